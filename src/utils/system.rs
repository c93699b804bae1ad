// file: src/utils/system.rs
// version: 2.0.0
// guid: w3x4y5z6-a7b8-9012-3456-789012wxyzab

//! System utility functions

use std::path::PathBuf;
use tracing::debug;

/// External tools the patcher and config drive builder shell out to
pub const REQUIRED_COMMANDS: &[&str] = &["guestfish", "genisoimage", "unzip", "tar", "git"];

/// System utility functions
pub struct SystemUtils;

impl SystemUtils {
    /// Locate a command on PATH
    pub fn find_command(command: &str) -> Option<PathBuf> {
        match which::which(command) {
            Ok(path) => {
                debug!("found {} at {}", command, path.display());
                Some(path)
            }
            Err(_) => None,
        }
    }

    /// Check if a command exists in PATH
    pub fn command_exists(command: &str) -> bool {
        Self::find_command(command).is_some()
    }

    /// Check if running as root
    pub fn is_root() -> bool {
        #[cfg(unix)]
        {
            unsafe { libc::geteuid() == 0 }
        }
        #[cfg(not(unix))]
        {
            false
        }
    }

    /// Required commands that are not installed
    pub fn check_prerequisites() -> Vec<String> {
        REQUIRED_COMMANDS
            .iter()
            .filter(|cmd| !Self::command_exists(cmd))
            .map(|cmd| cmd.to_string())
            .collect()
    }

    /// Package providing a required command on Debian/Ubuntu
    pub fn install_hint(command: &str) -> Option<&'static str> {
        match command {
            "guestfish" => Some("sudo apt install libguestfs-tools"),
            "genisoimage" | "mkisofs" => Some("sudo apt install genisoimage"),
            "unzip" => Some("sudo apt install unzip"),
            "tar" => Some("sudo apt install tar"),
            "git" => Some("sudo apt install git"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_command() {
        assert!(!SystemUtils::command_exists("definitely-not-a-real-command-xyz"));
    }

    #[test]
    fn test_install_hints_cover_required_commands() {
        for cmd in REQUIRED_COMMANDS {
            assert!(SystemUtils::install_hint(cmd).is_some(), "{}", cmd);
        }
        assert!(SystemUtils::install_hint("qemu-img").is_none());
    }
}
