/// mDNS service type the registry daemon advertises itself under
pub const REGISTRY_SERVICE_TYPE: &str = "_iphub._tcp.local.";

/// TXT record keys used in the registry advertisement
pub const TXT_VERSION: &str = "version";

/// Default port the daemon listens on
pub const DEFAULT_PORT: u16 = 5000;

/// API paths
pub const REPORT_PATH: &str = "/report_ip";
pub const RESOLVE_PATH: &str = "/get_ip";
pub const LIST_PATH: &str = "/list_devices";
pub const DIGEST_PATH: &str = "/list_devices/hash";
pub const REMOVE_PATH: &str = "/remove_device";
