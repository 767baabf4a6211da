mod install;
mod types;

pub use install::{
    missing_components, parse_steamcmd_progress, Installer, NativeInstaller, ProgressFn,
    STAGE_DOWNLOADING, STAGE_EXTRACTING, STAGE_UPDATING,
};
pub use types::{Component, DeployKind};
