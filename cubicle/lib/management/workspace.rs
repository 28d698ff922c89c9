use std::{
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use chrono::Local;
use getset::Getters;
use sha2::{Digest, Sha256};
use tokio::fs;
use typed_builder::TypedBuilder;

use crate::{
    utils::{self, SIGNATURE_FILENAME},
    CubicleError, CubicleResult,
};

use super::overlay;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Marker of the provisioning time line in a signature file.
pub const SIGNATURE_TIMESTAMP_MARKER: &str = "Timestamp:";

/// Marker of the unique hash line in a signature file.
pub const SIGNATURE_HASH_MARKER: &str = "Unique Hash:";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// What was found at a tenant's workspace path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceState {
    /// Nothing exists at the path.
    Absent,

    /// Something exists but it is not a complete workspace.
    Invalid(String),

    /// A populated directory with a well formed signature.
    Valid,
}

/// What [`WorkspaceProvisioner::ensure`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// The template was copied and a new signature written.
    Created,

    /// A valid workspace was already in place and left untouched.
    AlreadyValid,
}

/// Prepares per-tenant workspace directories from a template tree.
#[derive(Debug, Clone, Getters, TypedBuilder)]
#[getset(get = "pub with_prefix")]
pub struct WorkspaceProvisioner {
    /// The template tree copied into every new workspace.
    #[builder(setter(into))]
    template_dir: PathBuf,

    /// The directory under which workspaces are created.
    #[builder(setter(into))]
    deploy_root: PathBuf,

    /// The disk image tool used to create overlays.
    #[builder(setter(into), default = PathBuf::from(overlay::DEFAULT_OVERLAY_TOOL))]
    overlay_tool: PathBuf,

    /// Base guest OS images an overlay is created for in every workspace.
    #[builder(default)]
    guest_images: Vec<PathBuf>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl WorkspaceProvisioner {
    /// Returns `<deploy_root>/<tenant>-<hash>`.
    pub fn workspace_dir(&self, tenant_id: &str) -> PathBuf {
        self.deploy_root.join(utils::workspace_dir_name(tenant_id))
    }

    /// Inspects the tenant's workspace.
    pub async fn inspect(&self, tenant_id: &str) -> CubicleResult<WorkspaceState> {
        inspect(self.workspace_dir(tenant_id)).await
    }

    /// Makes sure the tenant has a valid workspace, copying the template if it does not.
    pub async fn ensure(&self, tenant_id: &str) -> CubicleResult<EnsureOutcome> {
        ensure(tenant_id, &self.template_dir, self.workspace_dir(tenant_id)).await
    }

    /// Creates any missing guest OS overlay in the tenant's workspace.
    pub async fn ensure_overlays(&self, tenant_id: &str) -> CubicleResult<Vec<PathBuf>> {
        overlay::ensure_overlays(
            &self.overlay_tool,
            self.workspace_dir(tenant_id),
            &self.guest_images,
        )
        .await
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Classifies the directory at `deploy_dir`.
///
/// A workspace is valid when the path is a non-empty directory holding a signature file with both
/// the timestamp and unique hash markers.
pub async fn inspect(deploy_dir: impl AsRef<Path>) -> CubicleResult<WorkspaceState> {
    let deploy_dir = deploy_dir.as_ref();

    let metadata = match fs::metadata(deploy_dir).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(WorkspaceState::Absent),
        Err(e) => return Err(e.into()),
    };

    if !metadata.is_dir() {
        return Ok(WorkspaceState::Invalid("not a directory".to_string()));
    }

    let mut entries = fs::read_dir(deploy_dir).await?;
    if entries.next_entry().await?.is_none() {
        return Ok(WorkspaceState::Invalid("directory is empty".to_string()));
    }

    let content = match fs::read_to_string(deploy_dir.join(SIGNATURE_FILENAME)).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(WorkspaceState::Invalid("signature file missing".to_string()))
        }
        Err(e) => return Err(e.into()),
    };

    if !parse_signature(&content) {
        return Ok(WorkspaceState::Invalid(
            "signature file is missing required content".to_string(),
        ));
    }

    Ok(WorkspaceState::Valid)
}

/// Returns true if the signature content carries both required markers.
pub fn parse_signature(content: &str) -> bool {
    content.contains(SIGNATURE_TIMESTAMP_MARKER) && content.contains(SIGNATURE_HASH_MARKER)
}

/// Renders a fresh signature: the local time and the SHA-256 of a new v4 UUID.
pub fn render_signature() -> String {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
    let unique = uuid::Uuid::new_v4().to_string();
    let unique_hash = hex::encode(Sha256::digest(unique.as_bytes()));
    format!("{SIGNATURE_TIMESTAMP_MARKER} {timestamp}\n{SIGNATURE_HASH_MARKER} {unique_hash}\n")
}

/// Makes sure `deploy_dir` holds a valid workspace for the tenant.
///
/// A valid workspace is left alone. Otherwise the directory is created and every top level entry
/// of `template_dir` is copied in, overwriting same-named files left by an earlier attempt. The
/// signature is written last, so an interrupted copy never looks valid. Nothing is rolled back on
/// failure.
pub async fn ensure(
    tenant_id: &str,
    template_dir: impl AsRef<Path>,
    deploy_dir: impl AsRef<Path>,
) -> CubicleResult<EnsureOutcome> {
    let template_dir = template_dir.as_ref();
    let deploy_dir = deploy_dir.as_ref();

    match inspect(deploy_dir).await? {
        WorkspaceState::Valid => {
            tracing::info!(tenant = tenant_id, path = %deploy_dir.display(), "valid workspace exists");
            return Ok(EnsureOutcome::AlreadyValid);
        }
        WorkspaceState::Absent => {
            tracing::info!(tenant = tenant_id, path = %deploy_dir.display(), "provisioning workspace");
        }
        WorkspaceState::Invalid(reason) => {
            tracing::warn!(tenant = tenant_id, path = %deploy_dir.display(), %reason, "reprovisioning invalid workspace");
        }
    }

    if !fs::metadata(template_dir)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
    {
        return Err(CubicleError::WorkdirInvalid(format!(
            "template {} is not a directory",
            template_dir.display()
        )));
    }

    fs::create_dir_all(deploy_dir)
        .await
        .map_err(|e| CubicleError::WorkdirInvalid(format!("{}: {e}", deploy_dir.display())))?;

    copy_tree(template_dir, deploy_dir).await?;

    fs::write(deploy_dir.join(SIGNATURE_FILENAME), render_signature())
        .await
        .map_err(|e| copy_failed(deploy_dir.join(SIGNATURE_FILENAME), e))?;

    tracing::info!(tenant = tenant_id, path = %deploy_dir.display(), "workspace ready");
    Ok(EnsureOutcome::Created)
}

/// Copies the contents of `source_dir` into `dest_dir`.
///
/// Regular files keep their permission bits and modification time, symlinks are recreated with
/// their original target, and directories keep their permission bits. Directory permissions are
/// applied after their contents are copied so read-only directories can still be filled.
pub async fn copy_tree(
    source_dir: impl AsRef<Path>,
    dest_dir: impl AsRef<Path>,
) -> CubicleResult<()> {
    let source_dir = source_dir.as_ref();
    let dest_dir = dest_dir.as_ref();

    let mut stack = vec![source_dir.to_path_buf()];
    let mut dir_modes = Vec::new();

    while let Some(current_path) = stack.pop() {
        let mut entries = fs::read_dir(&current_path)
            .await
            .map_err(|e| copy_failed(&current_path, e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| copy_failed(&current_path, e))?
        {
            let path = entry.path();
            let relative_path = path
                .strip_prefix(source_dir)
                .map_err(CubicleError::custom)?;
            let target_path = dest_dir.join(relative_path);

            let metadata = fs::symlink_metadata(&path)
                .await
                .map_err(|e| copy_failed(&path, e))?;
            let file_type = metadata.file_type();

            if file_type.is_dir() {
                tracing::debug!("Creating directory: {}", target_path.display());
                fs::create_dir_all(&target_path)
                    .await
                    .map_err(|e| copy_failed(&target_path, e))?;
                dir_modes.push((target_path, metadata.permissions().mode()));
                stack.push(path);
            } else if file_type.is_symlink() {
                tracing::debug!("Creating symlink: {}", target_path.display());
                copy_symlink(&path, &target_path).await?;
            } else if file_type.is_file() {
                tracing::debug!(
                    "Copying file: {} -> {}",
                    path.display(),
                    target_path.display()
                );
                copy_file(&path, &target_path, &metadata).await?;
            } else {
                tracing::warn!("Skipping special file: {}", path.display());
            }
        }
    }

    // Deepest directories first, so a read-only parent is locked down after its children.
    for (path, mode) in dir_modes.into_iter().rev() {
        fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            .await
            .map_err(|e| copy_failed(&path, e))?;
    }

    Ok(())
}

async fn copy_file(source: &Path, target: &Path, metadata: &std::fs::Metadata) -> CubicleResult<()> {
    // A read-only file from an earlier partial copy cannot be overwritten in place.
    if let Ok(existing) = fs::symlink_metadata(target).await {
        if existing.is_dir() {
            fs::remove_dir_all(target)
                .await
                .map_err(|e| copy_failed(target, e))?;
        } else {
            fs::remove_file(target)
                .await
                .map_err(|e| copy_failed(target, e))?;
        }
    }

    fs::copy(source, target)
        .await
        .map_err(|e| copy_failed(target, e))?;
    fs::set_permissions(target, metadata.permissions())
        .await
        .map_err(|e| copy_failed(target, e))?;

    let modified = metadata.modified().map_err(|e| copy_failed(source, e))?;
    let file = fs::File::open(target)
        .await
        .map_err(|e| copy_failed(target, e))?;
    file.into_std()
        .await
        .set_modified(modified)
        .map_err(|e| copy_failed(target, e))?;

    Ok(())
}

async fn copy_symlink(source: &Path, target: &Path) -> CubicleResult<()> {
    let link_target = fs::read_link(source)
        .await
        .map_err(|e| copy_failed(source, e))?;

    if fs::symlink_metadata(target).await.is_ok() {
        fs::remove_file(target)
            .await
            .map_err(|e| copy_failed(target, e))?;
    }

    fs::symlink(&link_target, target)
        .await
        .map_err(|e| copy_failed(target, e))
}

fn copy_failed(path: impl Into<PathBuf>, source: std::io::Error) -> CubicleError {
    CubicleError::CopyFailed {
        path: path.into(),
        source,
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
