use crate::error::{Error, Result};
use crate::workspace::Workspace;

const ACCEPTED: &str = "eula=true\n";

/// Makes `workspace` launchable, or says why it cannot be.
///
/// The license marker is (over)written to the accepted state unless it
/// already records acceptance; nothing else in the workspace is touched.
/// A missing launch artifact is reported as [`Error::NotLaunchable`].
/// Calling this repeatedly is harmless.
#[tracing::instrument(skip(workspace), fields(server_name = %workspace.name()))]
pub fn ensure(workspace: &Workspace) -> Result<()> {
    let marker = workspace.license_path();
    let accepted = match std::fs::read_to_string(&marker) {
        Ok(content) => records_acceptance(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => return Err(e.into()),
    };

    if !accepted {
        std::fs::write(&marker, ACCEPTED)?;
        tracing::info!(path = %marker.display(), "Accepted server license");
    }

    let artifact = workspace.artifact_path();
    if !artifact.is_file() {
        tracing::warn!(artifact = %artifact.display(), "Launch artifact missing");
        return Err(Error::NotLaunchable {
            name: workspace.name().to_string(),
            artifact,
        });
    }

    Ok(())
}

pub(crate) fn records_acceptance(content: &str) -> bool {
    content
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .any(|(key, value)| {
            key.trim() == "eula" && value.trim().eq_ignore_ascii_case("true")
        })
}
