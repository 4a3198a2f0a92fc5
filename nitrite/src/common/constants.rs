// attributes constants
pub const CREATED_TIME: &str = "created_at";
pub const LAST_MODIFIED_TIME: &str = "last_modified_at";
pub const OWNER: &str = "owner";
pub const UNIQUE_ID: &str = "uuid";

// store constants
pub const META_MAP_NAME: &str = "$nitrite_meta_map";
pub const USER_MAP: &str = "$nitrite_users";
pub const STORE_INFO: &str = "$nitrite_store_info";
pub const RTREE_MAP_PREFIX: &str = "$nitrite_rtree|";

// store info keys
pub const STORE_CREATED_TIME: &str = "created_at";
pub const STORE_NAME: &str = "store";
pub const STORE_VERSION: &str = "store_version";
pub const SCHEMA_VERSION: &str = "schema_version";
pub const NITRITE_VERSION_KEY: &str = "nitrite_version";

// credential record keys
pub const USER_HASH: &str = "hash";

// event constants
pub const NITRITE_EVENT: &str = "nitrite_event";

pub const INITIAL_SCHEMA_VERSION: u32 = 1;
pub const NO2: &str = "NO\u{2082}";
pub const RESERVED_NAMES: [&str; 4] = [USER_MAP, META_MAP_NAME, STORE_INFO, RTREE_MAP_PREFIX];

pub const NITRITE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns `true` when `name` is reserved for internal bookkeeping maps.
pub fn is_reserved_name(name: &str) -> bool {
    RESERVED_NAMES.iter().any(|reserved| name.starts_with(reserved))
}
