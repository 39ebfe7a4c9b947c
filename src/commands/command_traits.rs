//! Command pattern interface
//!
//! Each command-line tool parses its arguments into a command object and
//! then executes it, keeping argument handling apart from the work itself.

use crate::errors::KitResult;

/// Represents an executable command in the application
///
/// Command objects encapsulate the logic for a specific CLI operation,
/// allowing for separation of concerns and better testability.
pub trait Command {
    /// Execute the command
    ///
    /// # Returns
    /// Result indicating success or an error
    fn execute(&self) -> KitResult<()>;
}
