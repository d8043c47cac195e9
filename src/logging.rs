//! Structured logging module for Pivot Chat
//!
//! Writes logs to ~/.pivot-chat/logs/ (or the directory given to
//! `init_logging_in`) with categories:
//! - TURN: Chat turn lifecycle (base call, playback, settle)
//! - PERSONALIZE: Personalization overlay and anchor hydration
//! - HOOKS: Re-engagement hook generation
//! - STORAGE: Persisted blobs and debounced saves
//! - ERROR: Errors and degraded paths

use chrono::{Local, Utc};
use once_cell::sync::Lazy;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Which part of the chat pipeline a line comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCategory {
    Turn,        // Chat turn lifecycle
    Personalize, // Second pass, hydration, pills
    Hooks,       // Home-screen hooks
    Storage,     // SQLite blobs, debounced saves
    Error,       // Errors and degraded paths
}

impl LogCategory {
    fn as_str(&self) -> &'static str {
        match self {
            LogCategory::Turn => "TURN",
            LogCategory::Personalize => "PERSONALIZE",
            LogCategory::Hooks => "HOOKS",
            LogCategory::Storage => "STORAGE",
            LogCategory::Error => "ERROR",
        }
    }
}

/// Log directory, set once logging is initialized. Nothing is written to
/// disk before that.
static LOG_DIR: Lazy<Mutex<Option<PathBuf>>> = Lazy::new(|| Mutex::new(None));

/// Default log directory path
pub fn default_log_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".pivot-chat").join("logs")
}

/// Today's log file inside `dir`
fn log_file_path(dir: &Path) -> PathBuf {
    let today = Local::now().format("%Y-%m-%d").to_string();
    dir.join(format!("pivot-chat-{}.log", today))
}

/// Initialize the logging system in the default directory
pub fn init_logging() -> std::io::Result<()> {
    init_logging_in(&default_log_dir())
}

/// Log to files under `dir`, creating it when missing
pub fn init_logging_in(dir: &Path) -> std::io::Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    }

    if let Ok(mut guard) = LOG_DIR.lock() {
        *guard = Some(dir.to_path_buf());
    }

    log(LogCategory::Turn, None, "Pivot Chat logging initialized");
    Ok(())
}

fn format_line(category: LogCategory, conversation_id: Option<&str>, message: &str) -> String {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let conv_context = conversation_id
        .map(|id| {
            let short: String = id.chars().take(8).collect();
            format!("conversation={} | ", short)
        })
        .unwrap_or_default();

    format!(
        "[{}] [{}] {}{}\n",
        timestamp,
        category.as_str(),
        conv_context,
        message
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Console {
    Stdout,
    Stderr,
}

// Once file logging is on, stdout belongs to the chat session.
fn console_for(log_dir: Option<&Path>) -> Console {
    match log_dir {
        Some(_) => Console::Stderr,
        None => Console::Stdout,
    }
}

/// Print a categorized line and append it to the day's file once initialized
pub fn log(category: LogCategory, conversation_id: Option<&str>, message: &str) {
    let log_line = format_line(category, conversation_id, message);

    let dir = match LOG_DIR.lock() {
        Ok(guard) => guard.clone(),
        Err(_) => None,
    };

    match console_for(dir.as_deref()) {
        Console::Stdout => print!("{}", log_line),
        Console::Stderr => eprint!("{}", log_line),
    }

    if let Some(dir) = dir {
        if let Ok(mut file) = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file_path(&dir))
        {
            let _ = file.write_all(log_line.as_bytes());
        }
    }
}

/// Log a turn lifecycle event
pub fn log_turn(conversation_id: Option<&str>, message: &str) {
    log(LogCategory::Turn, conversation_id, message);
}

/// Log a personalization event (hydration, pills, degrade)
pub fn log_personalize(conversation_id: Option<&str>, message: &str) {
    log(LogCategory::Personalize, conversation_id, message);
}

pub fn log_hooks(message: &str) {
    log(LogCategory::Hooks, None, message);
}

pub fn log_storage(message: &str) {
    log(LogCategory::Storage, None, message);
}

pub fn log_error(conversation_id: Option<&str>, message: &str) {
    log(LogCategory::Error, conversation_id, message);
}

/// Delete `.log` files older than seven days from the default directory
pub fn cleanup_old_logs() -> std::io::Result<usize> {
    cleanup_logs_in(&default_log_dir(), chrono::Duration::days(7))
}

pub fn cleanup_logs_in(log_dir: &Path, max_age: chrono::Duration) -> std::io::Result<usize> {
    let mut deleted = 0;

    if !log_dir.exists() {
        return Ok(0);
    }

    let cutoff = Utc::now() - max_age;

    for entry in fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("log") {
            continue;
        }

        if let Ok(metadata) = entry.metadata() {
            if let Ok(modified) = metadata.modified() {
                let modified_time: chrono::DateTime<Utc> = modified.into();
                if modified_time < cutoff && fs::remove_file(&path).is_ok() {
                    deleted += 1;
                }
            }
        }
    }

    Ok(deleted)
}
