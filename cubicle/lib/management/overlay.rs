//! Copy-on-write guest OS overlays.
//!
//! Every workspace gets one qcow2 overlay per configured base image, so tenants share the large
//! read-only base images and only pay for the blocks they write.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tokio::{fs, process::Command};

use crate::{utils::GUESTOS_SUBDIR, CubicleError, CubicleResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The disk image tool used when none is configured.
pub const DEFAULT_OVERLAY_TOOL: &str = "qemu-img";

/// Image format of both the base images and the overlays.
pub const OVERLAY_FORMAT: &str = "qcow2";

/// Suffix appended to the base image stem to name its overlay.
pub const OVERLAY_SUFFIX: &str = "_overlay";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The part of `qemu-img info --output=json` cubicle reads.
#[derive(Debug, Deserialize)]
struct ImageInfo {
    #[serde(rename = "backing-filename")]
    backing_filename: Option<PathBuf>,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns where the overlay of `base_image` lives inside `workspace`.
///
/// `/opt/os/guestos_base/ubuntu/disk.qcow2` maps to `<workspace>/guestos/ubuntu/disk_overlay.qcow2`.
pub fn overlay_path_for(workspace: impl AsRef<Path>, base_image: impl AsRef<Path>) -> PathBuf {
    let base_image = base_image.as_ref();

    let group = base_image
        .parent()
        .and_then(Path::file_name)
        .map(PathBuf::from)
        .unwrap_or_default();

    let stem = base_image
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let file_name = match base_image.extension() {
        Some(ext) => format!("{stem}{OVERLAY_SUFFIX}.{}", ext.to_string_lossy()),
        None => format!("{stem}{OVERLAY_SUFFIX}"),
    };

    workspace
        .as_ref()
        .join(GUESTOS_SUBDIR)
        .join(group)
        .join(file_name)
}

/// Creates a qcow2 overlay backed by `base_image`.
///
/// Runs `<tool> create -f qcow2 -b <base_image> -F qcow2 <overlay>` directly, without a shell. The
/// backing file is recorded exactly as given.
pub async fn create_overlay(
    tool: impl AsRef<Path>,
    base_image: impl AsRef<Path>,
    overlay: impl AsRef<Path>,
) -> CubicleResult<()> {
    let tool = tool.as_ref();
    let base_image = base_image.as_ref();
    let overlay = overlay.as_ref();

    tracing::info!(
        base = %base_image.display(),
        overlay = %overlay.display(),
        "creating overlay image"
    );

    let mut command = Command::new(tool);
    command
        .arg("create")
        .args(["-f", OVERLAY_FORMAT])
        .arg("-b")
        .arg(base_image)
        .args(["-F", OVERLAY_FORMAT])
        .arg(overlay);

    run_tool(command, tool, overlay).await?;
    Ok(())
}

/// Returns the backing file recorded in `overlay`, or `None` if the image has no backing file.
///
/// Runs `<tool> info -U --output=json <overlay>`. `-U` lets the query succeed while a guest holds
/// the image open.
pub async fn backing_file(
    tool: impl AsRef<Path>,
    overlay: impl AsRef<Path>,
) -> CubicleResult<Option<PathBuf>> {
    let tool = tool.as_ref();
    let overlay = overlay.as_ref();

    let mut command = Command::new(tool);
    command.arg("info").arg("-U").arg("--output=json").arg(overlay);

    let stdout = run_tool(command, tool, overlay).await?;
    let info: ImageInfo =
        serde_json::from_slice(&stdout).map_err(|e| CubicleError::OverlayCreationFailed {
            overlay: overlay.to_path_buf(),
            code: None,
            stderr: format!("unreadable image info: {e}"),
        })?;

    Ok(info.backing_filename)
}

/// Makes sure `workspace` holds an overlay for each of `base_images`.
///
/// Overlays that already exist are kept as they are, since recreating one would discard the
/// tenant's guest disk. An existing overlay must be backed by exactly its base image, otherwise this
/// fails with [`CubicleError::OverlayCreationFailed`]. Stops at the first failure. Returns the
/// overlay paths in input order.
pub async fn ensure_overlays(
    tool: impl AsRef<Path>,
    workspace: impl AsRef<Path>,
    base_images: &[PathBuf],
) -> CubicleResult<Vec<PathBuf>> {
    let tool = tool.as_ref();
    let workspace = workspace.as_ref();
    let mut overlays = Vec::with_capacity(base_images.len());

    for base_image in base_images {
        let overlay = overlay_path_for(workspace, base_image);

        if let Some(parent) = overlay.parent() {
            fs::create_dir_all(parent).await?;
        }

        if fs::symlink_metadata(&overlay).await.is_ok() {
            let backing = backing_file(tool, &overlay).await?;
            if backing.as_deref() != Some(base_image.as_path()) {
                tracing::error!(
                    overlay = %overlay.display(),
                    base = %base_image.display(),
                    backing = ?backing,
                    "existing overlay has a different backing file"
                );
                return Err(CubicleError::OverlayCreationFailed {
                    overlay,
                    code: None,
                    stderr: format!(
                        "existing overlay is backed by {}, expected {}",
                        backing
                            .as_deref()
                            .map_or_else(|| "nothing".into(), |b| b.display().to_string()),
                        base_image.display()
                    ),
                });
            }

            tracing::info!(overlay = %overlay.display(), "overlay exists, skipping");
        } else {
            create_overlay(tool, base_image, &overlay).await?;
        }

        overlays.push(overlay);
    }

    Ok(overlays)
}

/// Runs the disk image tool, mapping a spawn failure or a non-zero exit to
/// [`CubicleError::OverlayCreationFailed`]. Returns its stdout.
async fn run_tool(mut command: Command, tool: &Path, overlay: &Path) -> CubicleResult<Vec<u8>> {
    let output = command
        .output()
        .await
        .map_err(|e| CubicleError::OverlayCreationFailed {
            overlay: overlay.to_path_buf(),
            code: None,
            stderr: format!("failed to run {}: {e}", tool.display()),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        tracing::error!(
            overlay = %overlay.display(),
            code = ?output.status.code(),
            %stderr,
            "disk image tool failed"
        );
        return Err(CubicleError::OverlayCreationFailed {
            overlay: overlay.to_path_buf(),
            code: output.status.code(),
            stderr,
        });
    }

    Ok(output.stdout)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_overlay_path_for() {
        let ws = Path::new("/home/vms/alice-2bd806c97f0e00af");

        assert_eq!(
            overlay_path_for(ws, "/opt/os/guestos_base/ubuntu/disk.qcow2"),
            ws.join("guestos/ubuntu/disk_overlay.qcow2")
        );
        assert_eq!(
            overlay_path_for(ws, "/opt/os/guestos_base/fedora/root.v2.img"),
            ws.join("guestos/fedora/root.v2_overlay.img")
        );
        assert_eq!(
            overlay_path_for(ws, "/opt/os/guestos_base/raw/disk"),
            ws.join("guestos/raw/disk_overlay")
        );
    }

    #[test_log::test(tokio::test)]
    async fn test_create_overlay_passes_arguments() -> CubicleResult<()> {
        let temp = tempdir()?;
        let tool = helper::fake_tool(temp.path()).await?;
        let overlay = temp.path().join("disk_overlay.qcow2");

        create_overlay(&tool, "/opt/os/guestos_base/ubuntu/disk.qcow2", &overlay).await?;

        assert!(overlay.exists());
        let args = fs::read_to_string(temp.path().join("args.txt")).await?;
        assert_eq!(
            args.trim(),
            format!(
                "create -f qcow2 -b /opt/os/guestos_base/ubuntu/disk.qcow2 -F qcow2 {}",
                overlay.display()
            )
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_create_overlay_failure() -> CubicleResult<()> {
        let temp = tempdir()?;
        let overlay = temp.path().join("disk_overlay.qcow2");

        match create_overlay("false", "/base.qcow2", &overlay).await {
            Err(CubicleError::OverlayCreationFailed { overlay: o, code, .. }) => {
                assert_eq!(o, overlay);
                assert_eq!(code, Some(1));
            }
            other => panic!("expected OverlayCreationFailed, got {other:?}"),
        }

        let missing = create_overlay(temp.path().join("no-such-tool"), "/base.qcow2", &overlay).await;
        assert!(matches!(
            missing,
            Err(CubicleError::OverlayCreationFailed { code: None, .. })
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_ensure_overlays_skips_existing() -> CubicleResult<()> {
        let temp = tempdir()?;
        let ws = temp.path().join("ws");
        let tool = helper::fake_tool(temp.path()).await?;
        let bases = vec![
            PathBuf::from("/opt/os/guestos_base/ubuntu/disk.qcow2"),
            PathBuf::from("/opt/os/guestos_base/fedora/disk.qcow2"),
        ];

        let overlays = ensure_overlays(&tool, &ws, &bases).await?;
        assert_eq!(overlays.len(), 2);
        assert!(overlays.iter().all(|o| o.exists()));
        assert_eq!(helper::calls(temp.path(), "create").await?, 2);

        // Existing overlays are only inspected, never recreated.
        let again = ensure_overlays(&tool, &ws, &bases).await?;
        assert_eq!(again, overlays);
        assert_eq!(helper::calls(temp.path(), "create").await?, 2);
        assert_eq!(helper::calls(temp.path(), "info").await?, 2);

        Ok(())
    }

    #[tokio::test]
    async fn test_backing_file_reads_image_info() -> CubicleResult<()> {
        let temp = tempdir()?;
        let tool = helper::fake_tool(temp.path()).await?;
        let overlay = temp.path().join("disk_overlay.qcow2");

        create_overlay(&tool, "/opt/os/guestos_base/ubuntu/disk.qcow2", &overlay).await?;
        assert_eq!(
            backing_file(&tool, &overlay).await?,
            Some(PathBuf::from("/opt/os/guestos_base/ubuntu/disk.qcow2"))
        );

        // An image without a backing file.
        fs::write(&overlay, "").await?;
        assert_eq!(backing_file(&tool, &overlay).await?, None);

        assert!(matches!(
            backing_file("false", &overlay).await,
            Err(CubicleError::OverlayCreationFailed { code: Some(1), .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_ensure_overlays_rejects_foreign_backing_file() -> CubicleResult<()> {
        let temp = tempdir()?;
        let ws = temp.path().join("ws");
        let tool = helper::fake_tool(temp.path()).await?;
        let first = PathBuf::from("/opt/os/a/ubuntu/disk.qcow2");
        let second = PathBuf::from("/opt/os/b/ubuntu/disk.qcow2");

        // Both bases derive the same overlay path, so the second must not reuse the first's overlay.
        let err = ensure_overlays(&tool, &ws, &[first.clone(), second.clone()])
            .await
            .unwrap_err();
        match err {
            CubicleError::OverlayCreationFailed { overlay, stderr, .. } => {
                assert_eq!(overlay, ws.join("guestos/ubuntu/disk_overlay.qcow2"));
                assert!(stderr.contains("/opt/os/a/ubuntu/disk.qcow2"));
            }
            other => panic!("expected OverlayCreationFailed, got {other:?}"),
        }
        assert_eq!(helper::calls(temp.path(), "create").await?, 1);

        // The same happens when a workspace overlay was made from another base earlier.
        assert!(matches!(
            ensure_overlays(&tool, &ws, &[second]).await,
            Err(CubicleError::OverlayCreationFailed { .. })
        ));
        assert_eq!(ensure_overlays(&tool, &ws, &[first]).await?.len(), 1);
        Ok(())
    }

    mod helper {
        use super::*;

        /// Writes a stand-in for the disk image tool. It logs its arguments to `args.txt`. `create`
        /// stores the backing file inside the overlay and `info` reports it back as JSON.
        pub(super) async fn fake_tool(dir: &Path) -> CubicleResult<PathBuf> {
            let tool = dir.join("fake-qemu-img");
            let args = dir.join("args.txt");
            fs::write(
                &tool,
                format!(
                    r#"#!/bin/sh
echo "$@" >> '{}'
for last; do :; done
case "$1" in
  create) printf '%s' "$5" > "$last" ;;
  info)
    backing=$(cat "$last")
    if [ -n "$backing" ]; then
      printf '{{"filename": "%s", "format": "qcow2", "backing-filename": "%s"}}
' "$last" "$backing"
    else
      printf '{{"filename": "%s", "format": "qcow2"}}
' "$last"
    fi
    ;;
  *) exit 2 ;;
esac
"#,
                    args.display()
                ),
            )
            .await?;
            fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).await?;
            Ok(tool)
        }

        /// Counts how often the fake tool ran `subcommand`.
        pub(super) async fn calls(dir: &Path, subcommand: &str) -> CubicleResult<usize> {
            let log = fs::read_to_string(dir.join("args.txt")).await?;
            Ok(log
                .lines()
                .filter(|l| l.split_whitespace().next() == Some(subcommand))
                .count())
        }
    }
}
