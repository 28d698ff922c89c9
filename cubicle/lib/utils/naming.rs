use sha2::{Digest, Sha256};

use crate::{CubicleError, CubicleResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Prefix shared by every sandbox name.
pub const SANDBOX_NAME_PREFIX: &str = "code-server";

/// Number of hex characters of the tenant digest used in names and paths.
pub const TENANT_HASH_LEN: usize = 16;

/// Longest tenant id accepted.
pub const MAX_TENANT_ID_LEN: usize = 64;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns the first 16 hex characters of the tenant id's SHA-256 digest.
pub fn tenant_hash(tenant_id: &str) -> String {
    tenant_hash_with::<Sha256>(tenant_id)
}

/// Returns the first 16 hex characters of the tenant id's digest under `D`.
pub fn tenant_hash_with<D: Digest>(tenant_id: &str) -> String {
    let mut hash = hex::encode(D::digest(tenant_id.as_bytes()));
    hash.truncate(TENANT_HASH_LEN);
    hash
}

/// Returns the sandbox name of a tenant: `code-server-<tenant>-<hash>`.
pub fn sandbox_name(tenant_id: &str) -> String {
    sandbox_name_with::<Sha256>(tenant_id)
}

/// Returns the sandbox name of a tenant using digest `D` for the hash suffix.
pub fn sandbox_name_with<D: Digest>(tenant_id: &str) -> String {
    format!(
        "{SANDBOX_NAME_PREFIX}-{tenant_id}-{}",
        tenant_hash_with::<D>(tenant_id)
    )
}

/// Returns the workspace directory name of a tenant: `<tenant>-<hash>`.
pub fn workspace_dir_name(tenant_id: &str) -> String {
    format!("{tenant_id}-{}", tenant_hash(tenant_id))
}

/// Checks that a tenant id is safe to embed in sandbox names and filesystem paths.
///
/// Accepts 1 to 64 characters from `[A-Za-z0-9_.-]`, not starting with `.` or `-`.
pub fn validate_tenant_id(tenant_id: &str) -> CubicleResult<()> {
    let valid = !tenant_id.is_empty()
        && tenant_id.len() <= MAX_TENANT_ID_LEN
        && !tenant_id.starts_with(['.', '-'])
        && tenant_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));

    if !valid {
        return Err(CubicleError::InvalidTenantId(tenant_id.to_string()));
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
