//! Toolbox containers. The fingerprint is the image a container was
//! created from; changing it recreates the container.

use reconcile::{Backend, Error, ErrorCategory, Item, ItemId, ItemSet, Result};
use serde::Deserialize;

use crate::runner;

const NAME: &str = "toolbox";
const LABEL_FILTER: &str = "label=com.github.containers.toolbox=true";

#[derive(Debug, Deserialize)]
struct Container {
    #[serde(rename = "Names", default)]
    names: Vec<String>,
    #[serde(rename = "Image", default)]
    image: String,
}

/// Parse `podman ps -a --format json`
pub fn parse_ps(json: &str) -> Result<ItemSet> {
    if json.trim().is_empty() {
        return Ok(ItemSet::new());
    }
    let containers: Vec<Container> =
        serde_json::from_str(json).map_err(|e| Error::AdapterFailed {
            backend: NAME.to_string(),
            message: format!("unexpected podman output: {e}"),
            stderr: String::new(),
            category: ErrorCategory::Other,
        })?;

    Ok(containers
        .into_iter()
        .filter_map(|c| {
            let name = c.names.into_iter().next()?;
            let mut item = Item::new(name);
            if !c.image.is_empty() {
                item = item.with_fingerprint(short_image(&c.image));
            }
            Some(item)
        })
        .collect())
}

/// Image reference without its registry host, tagged `latest` when untagged.
///
/// Podman reports `registry.fedoraproject.org/fedora-toolbox:41` where a
/// manifest says `fedora-toolbox:41`; both reduce to the latter.
pub fn short_image(reference: &str) -> String {
    let reference = reference.trim();
    let path = match reference.split_once('/') {
        Some((host, rest)) if host.contains(['.', ':']) || host == "localhost" => {
            if host == "docker.io" {
                rest.strip_prefix("library/").unwrap_or(rest)
            } else {
                rest
            }
        }
        _ => reference,
    };
    let last = path.rsplit('/').next().unwrap_or(path);
    if path.contains('@') || last.contains(':') {
        path.to_string()
    } else {
        format!("{path}:latest")
    }
}

/// Image to create a container from: the fingerprint, else `source.image`
fn image_of(item: &Item) -> Option<&str> {
    item.fingerprint.as_deref().or_else(|| item.source("image"))
}

#[derive(Debug, Default)]
pub struct ToolboxBackend;

impl ToolboxBackend {
    fn create(&self, item: &Item) -> Result<()> {
        let mut args = vec!["create", "--assumeyes"];
        if let Some(image) = image_of(item) {
            args.extend(["--image", image]);
        }
        args.push(item.id.as_str());
        runner::run_checked(NAME, "toolbox", &args, Some(item.id.as_str()))?;
        Ok(())
    }
}

impl Backend for ToolboxBackend {
    fn name(&self) -> &str {
        NAME
    }

    fn is_available(&self) -> bool {
        runner::command_exists("toolbox") && runner::command_exists("podman")
    }

    fn list(&self) -> Result<ItemSet> {
        let out = runner::run_checked(
            NAME,
            "podman",
            &["ps", "-a", "--filter", LABEL_FILTER, "--format", "json"],
            None,
        )?;
        parse_ps(&out)
    }

    fn normalize(&self, mut item: Item) -> Item {
        item.fingerprint = item.fingerprint.as_deref().map(short_image);
        item
    }

    fn install(&self, item: &Item) -> Result<()> {
        let item = &self.normalize(item.clone());
        if let Some(existing) = self.list()?.get(item.id.as_str()) {
            if existing.matches(item) {
                log::debug!("{NAME}: {} already exists", item.id);
                return Ok(());
            }
            log::info!("{NAME}: recreating {} from a new image", item.id);
            self.remove(&item.id)?;
        }
        self.create(item)
    }

    fn remove(&self, id: &ItemId) -> Result<()> {
        runner::run_idempotent(
            NAME,
            "podman",
            &["rm", "-f", id.as_str()],
            Some(id.as_str()),
            &["no such container"],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ps() {
        let json = r#"[
            {"Id": "1a2b", "Names": ["fedora-toolbox-41"], "Image": "registry.fedoraproject.org/fedora-toolbox:41"},
            {"Id": "3c4d", "Names": ["dev"], "Image": ""},
            {"Id": "5e6f", "Names": []}
        ]"#;
        let items = parse_ps(json).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(
            items.get("fedora-toolbox-41").unwrap().fingerprint.as_deref(),
            Some("fedora-toolbox:41")
        );
        assert_eq!(items.get("dev").unwrap().fingerprint, None);
    }

    #[test]
    fn test_parse_empty_output() {
        assert!(parse_ps("").unwrap().is_empty());
        assert!(parse_ps("[]").unwrap().is_empty());
    }

    #[test]
    fn test_image_of_prefers_fingerprint() {
        let item = Item::new("dev")
            .with_fingerprint("quay.io/a:1")
            .with_source("image", "quay.io/b:2");
        assert_eq!(image_of(&item), Some("quay.io/a:1"));
        assert_eq!(
            image_of(&Item::new("dev").with_source("image", "quay.io/b:2")),
            Some("quay.io/b:2")
        );
    }

    #[test]
    fn test_short_image() {
        assert_eq!(
            short_image("registry.fedoraproject.org/fedora-toolbox:40"),
            "fedora-toolbox:40"
        );
        assert_eq!(short_image("fedora-toolbox:40"), "fedora-toolbox:40");
        assert_eq!(short_image("docker.io/library/ubuntu"), "ubuntu:latest");
        assert_eq!(short_image("localhost:5000/dev/box:1"), "dev/box:1");
        assert_eq!(short_image("quay.io/toolbx/arch-toolbox@sha256:ab"), "toolbx/arch-toolbox@sha256:ab");
    }

    #[test]
    fn test_declared_short_reference_matches_podman_output() {
        let json = r#"[{"Names": ["dev"], "Image": "registry.fedoraproject.org/fedora-toolbox:40"}]"#;
        let observed = parse_ps(json).unwrap();
        let declared = ToolboxBackend.normalize(Item::new("dev").with_fingerprint("fedora-toolbox:40"));
        assert!(observed.get("dev").unwrap().matches(&declared));

        let full = ToolboxBackend.normalize(
            Item::new("dev").with_fingerprint("registry.fedoraproject.org/fedora-toolbox:40"),
        );
        assert_eq!(full, declared);
    }
}
