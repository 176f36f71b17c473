//! Rebuild engine errors, in the same `snafu` idiom as the rest of
//! the core.

use crate::lvs::LvsError;
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum RebuildError {
    #[snafu(display("logical volume store error during rebuild: {}", source))]
    Lvs { source: LvsError },
    #[snafu(display("rebuild wire I/O error: {}", source))]
    Io { source: std::io::Error },
    #[snafu(display("donor name '{}' does not fit in the 256-byte wire field", name))]
    NameTooLong { name: String },
    #[snafu(display("linking '{}' under parent '{}' failed: {}", child, parent, source))]
    Link {
        child: String,
        parent: String,
        source: LvsError,
    },
}

pub type Result<T, E = RebuildError> = std::result::Result<T, E>;
