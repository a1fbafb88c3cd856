//! Hard input bounds. Requests past these are rejected, not truncated.

/// Max resources registered with one engine.
pub const MAX_RESOURCES: usize = 10_000;

/// Max reservation rows (active + retained history) per resource.
pub const MAX_RESERVATIONS_PER_RESOURCE: usize = 100_000;

/// Max length of a resource name.
pub const MAX_NAME_LEN: usize = 256;

/// Max length of an owner id supplied by the identity boundary.
pub const MAX_OWNER_ID_LEN: usize = 128;
