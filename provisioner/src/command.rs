/*
Copyright 2024 The Mockstack Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

use std::ffi::OsStr;
use std::io;
use std::process::Stdio;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::info;

/// Wraps a `tokio::process::Command` for easier handling.
///
/// The exit status is the sole success signal; output streams are inherited
/// so command output lands next to our own logs.
pub struct AsyncCommand {
    cmd: Command,
}

/// Errors originating from [`AsyncCommand`].
#[allow(missing_docs)]
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("failed spawning the command: {0:?}")]
    Spawn(io::Error),
    #[error("failed writing to the command stdin: {0:?}")]
    Stdin(io::Error),
    #[error("failed to wait for the command: {0:?}")]
    Wait(io::Error),
    #[error("command exited with {0:?}")]
    ExitStatus(Option<i32>),
}

impl AsyncCommand {
    /// Create a new AsyncCommand by providing the command binary and the arguments.
    pub fn new<C: AsRef<OsStr>, A: AsRef<OsStr>>(cmd: C, args: &[A]) -> Self {
        let mut cmd = Command::new(cmd);
        cmd.args(args);
        Self { cmd }
    }

    /// Run the command to completion.
    pub async fn run(&mut self) -> Result<(), CommandError> {
        info!("run: {:?}", self.cmd);
        let exit_status = self
            .cmd
            .spawn()
            .map_err(CommandError::Spawn)?
            .wait()
            .await
            .map_err(CommandError::Wait)?;

        if !exit_status.success() {
            return Err(CommandError::ExitStatus(exit_status.code()));
        }

        Ok(())
    }

    /// Run the command with `input` piped to its stdin.
    ///
    /// The input is never logged; it carries the registry password.
    pub async fn run_with_stdin(&mut self, input: &str) -> Result<(), CommandError> {
        info!("run: {:?}", self.cmd);
        self.cmd.stdin(Stdio::piped());
        let mut child = self.cmd.spawn().map_err(CommandError::Spawn)?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input.as_bytes())
                .await
                .map_err(CommandError::Stdin)?;
        }

        let exit_status = child.wait().await.map_err(CommandError::Wait)?;
        if !exit_status.success() {
            return Err(CommandError::ExitStatus(exit_status.code()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_exit_is_success() {
        let result = AsyncCommand::new("sh", &["-c", "exit 0"]).run().await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn non_zero_exit_is_an_error() {
        let result = AsyncCommand::new("sh", &["-c", "exit 3"]).run().await;
        match result {
            Err(CommandError::ExitStatus(code)) => assert_eq!(code, Some(3)),
            other => panic!("expected an exit status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stdin_reaches_the_command() {
        let result = AsyncCommand::new("sh", &["-c", "read line && [ \"$line\" = secret ]"])
            .run_with_stdin("secret\n")
            .await;
        assert!(result.is_ok());
    }
}
