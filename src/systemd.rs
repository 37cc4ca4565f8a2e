// src/systemd.rs
//! Renders a systemd service unit for running this binary.

use crate::config::CliArgs;
use std::path::{Path, PathBuf};

/// Fields substituted into the unit template.
#[derive(Debug, Clone)]
pub struct SystemdUnit {
    pub description: String,
    pub exec_start: String,
    pub working_directory: PathBuf,
    pub user: String,
}

impl SystemdUnit {
    /// Describes the currently running executable, run as the current user
    /// from the current directory with the arguments this process was given.
    pub fn for_current_process(cli_args: &CliArgs) -> std::io::Result<Self> {
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("LOGNAME"))
            .unwrap_or_else(|_| "root".to_string());
        Ok(Self::for_executable(
            &std::env::current_exe()?,
            std::env::current_dir()?,
            user,
            cli_args,
        ))
    }

    pub fn for_executable(
        exe: &Path,
        working_directory: PathBuf,
        user: impl Into<String>,
        cli_args: &CliArgs,
    ) -> Self {
        let description = exe
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());
        SystemdUnit {
            description,
            exec_start: exec_start(exe, &service_args(cli_args, &working_directory)),
            working_directory,
            user: user.into(),
        }
    }

    pub fn render(&self) -> String {
        format!(
            "[Unit]\n\
             Description={}\n\
             After=network.target\n\
             \n\
             [Service]\n\
             WorkingDirectory={}\n\
             ExecStart={}\n\
             Restart=always\n\
             User={}\n\
             \n\
             [Install]\n\
             WantedBy=multi-user.target\n",
            self.description,
            self.working_directory.display(),
            self.exec_start,
            self.user
        )
    }
}

/// The arguments the service needs to load the configuration this process
/// validated. Paths are made absolute against `cwd`.
pub fn service_args(cli_args: &CliArgs, cwd: &Path) -> Vec<String> {
    let absolute = |p: &Path| cwd.join(p).display().to_string();

    let mut args = Vec::new();
    if cli_args.relay {
        args.push("--relay".to_string());
    }
    if let Some(config) = &cli_args.config {
        args.push("--config".to_string());
        args.push(absolute(config));
    }
    if let Some(webaddr) = &cli_args.webaddr {
        args.push("--webaddr".to_string());
        args.push(webaddr.clone());
    }
    if let Some(log_level) = &cli_args.log_level {
        args.push("--log-level".to_string());
        args.push(log_level.clone());
    }
    args.extend(cli_args.folders.iter().map(|f| absolute(Path::new(f))));
    args
}

fn exec_start(exe: &Path, args: &[String]) -> String {
    let mut line = quote(&exe.display().to_string());
    for arg in args {
        line.push(' ');
        line.push_str(&quote(arg));
    }
    line
}

/// systemd splits `ExecStart` on whitespace unless the word is double-quoted.
fn quote(word: &str) -> String {
    if word.chars().any(char::is_whitespace) || word.contains('"') {
        format!("\"{}\"", word.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        word.to_string()
    }
}
