//! Interface addressing and routing through external commands.
//!
//! Command lines are produced by the per-platform plans in [`linux`] and
//! [`darwin`]; [`host`] names the one matching the build target. They are
//! executed through a [`CommandRunner`], which tests replace with
//! [`MockRunner`].

pub mod darwin;
pub mod linux;

#[cfg(test)]
pub use self::mock::MockRunner;

#[cfg(target_os = "macos")]
pub use self::darwin as host;
#[cfg(not(target_os = "macos"))]
pub use self::linux as host;

use std::borrow::Cow;
use std::io;
use std::net::Ipv4Addr;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use ipnet::{IpNet, Ipv4Net};

use crate::error::{Result, TunnelError};

/// Exit status and interleaved stdout/stderr of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub output: String,
}

/// Runs a single command line.
pub trait CommandRunner: Send + Sync {
    fn run(&self, command: &str) -> io::Result<CommandOutput>;
}

/// Runs command lines through `/bin/sh` with stderr folded into stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&self, command: &str) -> io::Result<CommandOutput> {
        let output = Command::new("/bin/sh")
            .arg("-c")
            .arg(format!("exec 2>&1; {command}"))
            .stdin(Stdio::null())
            .output()?;
        Ok(CommandOutput {
            success: output.status.success(),
            output: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }
}

/// What a command plan needs to know about the interface.
#[derive(Debug, Clone, Copy)]
pub struct Interface<'a> {
    pub name: &'a str,
    /// Gateway with its prefix, e.g. `10.8.0.1/24`.
    pub gateway: Ipv4Net,
    pub mtu: u16,
}

impl Interface<'_> {
    pub fn address(&self) -> Ipv4Addr {
        self.gateway.addr()
    }

    pub fn netmask(&self) -> Ipv4Addr {
        self.gateway.netmask()
    }

    /// Network routed through the interface, e.g. `10.8.0.0/24`.
    pub fn network(&self) -> Ipv4Net {
        self.gateway.trunc()
    }
}

/// One entry of a configuration plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Run(String),
    /// Give the kernel time to publish the interface before the next step.
    Settle(Duration),
}

/// Canonical network form of `cidr` (`10.0.0.5/24` becomes `10.0.0.0/24`).
/// Input that does not parse is returned unchanged and left for the route
/// command to judge.
pub fn normalize_cidr(cidr: &str) -> String {
    match cidr.trim().parse::<IpNet>() {
        Ok(net) => net.trunc().to_string(),
        Err(_) => {
            tracing::warn!(cidr, "route target is not a CIDR, passing it through");
            cidr.to_string()
        }
    }
}

/// Quotes `arg` for `/bin/sh` unless it is made only of characters the
/// shell passes through literally.
pub(crate) fn quote(arg: &str) -> Cow<'_, str> {
    shell_escape::escape(Cow::Borrowed(arg))
}

pub struct Configurator<'a> {
    runner: &'a dyn CommandRunner,
    debug: bool,
}

impl<'a> Configurator<'a> {
    pub fn new(runner: &'a dyn CommandRunner, debug: bool) -> Self {
        Self { runner, debug }
    }

    /// Runs `steps` in order, stopping at the first failing command.
    pub fn apply(&self, steps: &[Step]) -> Result<()> {
        for step in steps {
            match step {
                Step::Run(command) => self.exec(command)?,
                Step::Settle(delay) => thread::sleep(*delay),
            }
        }
        Ok(())
    }

    pub fn exec(&self, command: &str) -> Result<()> {
        if self.debug {
            tracing::info!(command, "running");
        } else {
            tracing::debug!(command, "running");
        }

        let result = self
            .runner
            .run(command)
            .map_err(|source| TunnelError::CommandSpawn {
                command: command.to_string(),
                source,
            })?;

        let output = result.output.trim_end();
        if !output.is_empty() {
            if self.debug {
                tracing::info!(command, output, "command output");
            } else {
                tracing::debug!(command, output, "command output");
            }
        }

        if result.success {
            Ok(())
        } else {
            Err(TunnelError::CommandFailed {
                command: command.to_string(),
                output: output.to_string(),
            })
        }
    }
}
