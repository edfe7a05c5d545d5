use portal_core::*;

#[test]
fn test_current_process_id() {
    let pid = ProcessId::current();

    assert!(pid.as_raw() > 0);
    assert_eq!(pid.as_raw() as u32, std::process::id());
}

#[test]
fn test_process_id_serialization() {
    let pid = ProcessId::from_raw(1234);

    let json = serde_json::to_string(&pid).unwrap();
    assert_eq!(json, "1234");

    let deserialized: ProcessId = serde_json::from_str(&json).unwrap();
    assert_eq!(pid, deserialized);
}

#[test]
fn test_process_id_display() {
    let pid = ProcessId::from_raw(31337);
    assert_eq!(format!("{}", pid), "31337");
    assert_eq!(format!("{}", ProcEntry::Pid(pid)), "31337");
}

#[test]
fn test_invalid_process_id_is_config_error() {
    let err = "not-a-pid".parse::<ProcessId>().unwrap_err();

    assert!(matches!(err, Error::InvalidConfig { .. }));
    assert_eq!(err.code(), libc::EINVAL);
}

#[test]
fn test_fatal_errors() {
    assert!(Error::Indeterminate.is_fatal());
    assert!(!Error::ProcessNotFound { pid: 1 }.is_fatal());
    assert!(!Error::InvalidNamespaces { bits: 0 }.is_fatal());
}
