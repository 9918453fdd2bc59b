//! Toast-style notices shown to the user.
//!
//! Every user action ends in one or more notices instead of a propagated
//! error. The console sink prints them; tests collect them in memory.

#[cfg(test)]
use std::cell::RefCell;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Success,
    Warning,
    Error,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub level: Level,
    pub title: String,
    pub detail: Option<String>,
}

impl Notice {
    fn new(level: Level, title: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            level,
            title: title.into(),
            detail,
        }
    }

    pub fn info(title: impl Into<String>) -> Self {
        Self::new(Level::Info, title, None)
    }

    pub fn success(title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(Level::Success, title, Some(detail.into()))
    }

    pub fn warning(title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(Level::Warning, title, Some(detail.into()))
    }

    pub fn error(title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(Level::Error, title, Some(detail.into()))
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let marker = match self.level {
            Level::Info => "..",
            Level::Success => "ok",
            Level::Warning => "!!",
            Level::Error => "xx",
        };
        write!(f, "[{}] {}", marker, self.title)?;
        if let Some(detail) = &self.detail {
            write!(f, ": {}", detail)?;
        }
        Ok(())
    }
}

/// Sink for notices
pub trait Notifier {
    fn notify(&self, notice: Notice);
}

/// Prints notices to the terminal; errors and warnings go to stderr
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, notice: Notice) {
        match notice.level {
            Level::Info | Level::Success => println!("{}", notice),
            Level::Warning | Level::Error => eprintln!("{}", notice),
        }
    }
}

/// Keeps notices in memory, in order
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    notices: RefCell<Vec<Notice>>,
}

#[cfg(test)]
impl MemoryNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.borrow().clone()
    }

    pub fn count(&self, level: Level) -> usize {
        self.notices
            .borrow()
            .iter()
            .filter(|n| n.level == level)
            .count()
    }
}

#[cfg(test)]
impl Notifier for MemoryNotifier {
    fn notify(&self, notice: Notice) {
        self.notices.borrow_mut().push(notice);
    }
}
