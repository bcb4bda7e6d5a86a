use std::path::PathBuf;

use clap::{Args, Parser};
use splatview_ply::MaxPoints;
use splatview_remote::RemoteConfig;

#[derive(Clone, Debug, Args)]
pub struct ViewConfig {
    /// Maximum number of points handed to the viewer. Larger clouds are truncated.
    #[arg(long, help_heading = "View options", default_value_t = MaxPoints::DEFAULT)]
    pub max_points: MaxPoints,

    /// Folder to keep downloaded results in, as result_{job}.ply.
    ///
    /// Results are not written to disk when this isn't set.
    #[arg(long, help_heading = "View options")]
    pub cache_dir: Option<PathBuf>,
}

#[derive(Parser, Clone, Debug)]
pub struct ProcessArgs {
    #[clap(flatten)]
    pub remote: RemoteConfig,
    #[clap(flatten)]
    pub view: ViewConfig,
}

impl Default for ProcessArgs {
    fn default() -> Self {
        Self::parse_from([""])
    }
}
