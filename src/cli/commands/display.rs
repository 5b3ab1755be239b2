//! Shared display helpers for requirement status lines.

use crate::requirements::RequirementStatus;
use crate::ui::UserInterface;

/// One line describing a requirement's status.
pub fn status_line(status: &RequirementStatus) -> String {
    let icon = if status.has_been_provided { "✓" } else { "✗" };
    format!(
        "  {} {}: {}",
        icon, status.requirement.env_var, status.status_description
    )
}

/// Print every status, met ones as messages and unmet ones as warnings.
pub fn show_statuses(ui: &mut dyn UserInterface, statuses: &[RequirementStatus]) {
    for status in statuses {
        let line = status_line(status);
        if status.has_been_provided {
            ui.message(&line);
        } else {
            ui.warning(&line);
        }
    }
}
