//! Handler unit selection: which language runtime executes the user code.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Runtime chosen to execute the handler unit.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum RuntimeSelection {
    /// Pick the runtime from the handler file extension.
    #[default]
    Auto,
    /// Python module executed by `python3`.
    Python,
    /// CommonJS module executed by `node`.
    Node,
    /// An executable that speaks the worker protocol itself.
    Executable,
}
