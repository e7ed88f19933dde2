//! Ecosystem backends
//!
//! Each backend either shells out to the tool that owns its state or manages
//! a directory directly. Parsing is split into free functions so it can be
//! tested without the tools installed.

pub mod appimage;
pub mod dconf;
pub mod extensions;
pub mod flatpak;
pub mod homebrew;
pub mod rpm_ostree;
pub mod shim;
pub mod toolbox;
pub mod upstream;

pub use appimage::AppImageBackend;
pub use dconf::DconfBackend;
pub use extensions::ExtensionsBackend;
pub use flatpak::FlatpakBackend;
pub use homebrew::HomebrewBackend;
pub use rpm_ostree::RpmOstreeBackend;
pub use shim::ShimBackend;
pub use toolbox::ToolboxBackend;
pub use upstream::UpstreamBackend;
