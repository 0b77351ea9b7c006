use console::{style, StyledObject};

use ci_sentinel::models::CollectionStatus;

pub fn bright(text: impl std::fmt::Display) -> StyledObject<String> {
    style(text.to_string()).bright()
}

pub fn bright_green(text: impl std::fmt::Display) -> StyledObject<String> {
    style(text.to_string()).bright().green()
}

pub fn bright_yellow(text: impl std::fmt::Display) -> StyledObject<String> {
    style(text.to_string()).bright().yellow()
}

pub fn bright_red(text: impl std::fmt::Display) -> StyledObject<String> {
    style(text.to_string()).bright().red()
}

pub fn dim(text: impl std::fmt::Display) -> StyledObject<String> {
    style(text.to_string()).dim()
}

pub fn magenta_bold(text: impl std::fmt::Display) -> StyledObject<String> {
    style(text.to_string()).magenta().bold()
}

/// Colour for a count that is only worth attention when non-zero.
pub fn count(value: usize, bad: bool) -> StyledObject<String> {
    match (value, bad) {
        (0, _) => dim(value),
        (_, true) => bright_red(value),
        (_, false) => bright_green(value),
    }
}

pub fn queue_status(status: CollectionStatus) -> StyledObject<String> {
    match status {
        CollectionStatus::Pending => bright_yellow(status),
        CollectionStatus::Complete => bright_green(status),
        CollectionStatus::Partial => style(status.to_string()).cyan(),
        CollectionStatus::Error => bright_red(status),
    }
}
