//! Operator console.
//!
//! Terminal I/O runs on a dedicated OS thread; watch operations run on the
//! tokio runtime through a [`Handle`]. Every failed command prints one line
//! and the console keeps going.

mod prompt;

pub use prompt::{DialoguerPrompter, Prompter};

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use schinet_core::platform::PRIVATE_SOURCE;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::watch::{
    ChannelScope, SessionSnapshot, SourceRef, WatchError, WatchRequest, WatchService,
};

const COMMANDS: [&str; 5] = ["watch", "kill", "list", "help", "exit"];

/// Console state: prompts, output, and backlog replays still in flight.
pub struct Console<P, W> {
    prompter: P,
    out: W,
    service: Arc<WatchService>,
    handle: Handle,
    backlogs: Vec<(String, JoinHandle<Result<usize, WatchError>>)>,
}

impl<P: Prompter, W: Write> Console<P, W> {
    pub fn new(prompter: P, out: W, service: Arc<WatchService>, handle: Handle) -> Self {
        Self {
            prompter,
            out,
            service,
            handle,
            backlogs: Vec::new(),
        }
    }

    /// Run until `exit`. Only prompt or output failures end the loop early.
    pub fn run(mut self) -> Result<()> {
        loop {
            self.report_backlogs()?;
            let line = self.prompter.command()?;
            let command = line.trim().to_lowercase();

            let result = match command.as_str() {
                "" => Ok(()),
                "exit" => break,
                "watch" => self.watch(),
                "kill" => self.kill(),
                "list" => self.list(),
                _ => self.help(),
            };
            if let Err(e) = result {
                writeln!(self.out, "{e:#}")?;
            }
        }
        info!("Console exit requested");
        Ok(())
    }

    fn watch(&mut self) -> Result<()> {
        let sources = self.handle.block_on(self.service.db().list_sources())?;
        let sources: Vec<_> = sources
            .into_iter()
            .filter(|s| s.id != PRIVATE_SOURCE)
            .collect();

        let mut items = vec!["Private Messages".to_string()];
        items.extend(sources.iter().map(|s| s.name.clone()));
        let Some(choice) = self.prompter.select("Select a source", &items)? else {
            return Ok(());
        };

        let (source, scope) = if choice == 0 {
            let source = SourceRef {
                id: PRIVATE_SOURCE.to_string(),
                name: "Private Messages".to_string(),
            };
            (source, ChannelScope::All)
        } else {
            let picked = &sources[choice - 1];
            let source = SourceRef {
                id: picked.id.clone(),
                name: picked.name.clone(),
            };
            let channels = self
                .handle
                .block_on(self.service.db().list_channels(&source.id))?;

            let mut items = vec!["All channels".to_string()];
            items.extend(channels.iter().map(|c| c.name.clone()));
            let Some(choice) = self.prompter.select("Select a channel", &items)? else {
                return Ok(());
            };
            let scope = match choice.checked_sub(1) {
                None => ChannelScope::All,
                Some(i) => ChannelScope::Channel {
                    id: channels[i].id.clone(),
                    name: channels[i].name.clone(),
                },
            };
            (source, scope)
        };

        let backlog = self
            .prompter
            .count("Amount of messages to pull from database")?;

        let existing = self
            .handle
            .block_on(self.service.registry().lookup(&source.id));
        if !existing.is_empty() {
            writeln!(
                self.out,
                "{} already has {} watcher(s); starting another",
                source.name,
                existing.len()
            )?;
        }

        writeln!(self.out, "Starting new watcher...")?;
        let created = self.handle.block_on(self.service.create(WatchRequest {
            source,
            scope,
            backlog,
        }))?;

        let session = &created.session;
        writeln!(
            self.out,
            "Watching {} on port {} (viewer pid {})",
            session.label(),
            session.port,
            session.viewer_pid.as_deref().unwrap_or("?")
        )?;
        self.backlogs.push((session.label(), created.backlog));
        Ok(())
    }

    fn kill(&mut self) -> Result<()> {
        let sessions = self.handle.block_on(self.service.list());
        if sessions.is_empty() {
            writeln!(self.out, "No active watchers.")?;
            return Ok(());
        }

        let items: Vec<String> = sessions.iter().map(describe).collect();
        let Some(index) = self.prompter.select("Select a watcher to kill", &items)? else {
            return Ok(());
        };

        let ticket = self.handle.block_on(self.service.kill(index))?;
        let grace = self.service.settings().shutdown_grace();
        let closed = self
            .handle
            .block_on(async { tokio::time::timeout(grace, ticket.closed()).await });
        if closed.is_ok() {
            writeln!(self.out, "Stopped {}", ticket.session.label())?;
        } else {
            writeln!(self.out, "{} is still closing", ticket.session.label())?;
        }
        Ok(())
    }

    fn list(&mut self) -> Result<()> {
        let sessions = self.handle.block_on(self.service.list());
        if sessions.is_empty() {
            writeln!(self.out, "No active watchers.")?;
        }
        for (n, session) in sessions.iter().enumerate() {
            writeln!(self.out, " [{n:2}] {}", describe(session))?;
        }
        Ok(())
    }

    fn help(&mut self) -> Result<()> {
        let line: String = COMMANDS.iter().map(|c| format!("{c:>10} ")).collect();
        writeln!(self.out, "{}", line.trim_end())?;
        Ok(())
    }

    /// Print the outcome of backlog replays that finished since last time.
    fn report_backlogs(&mut self) -> Result<()> {
        let (finished, running): (Vec<_>, Vec<_>) = self
            .backlogs
            .drain(..)
            .partition(|(_, task)| task.is_finished());
        self.backlogs = running;

        for (label, task) in finished {
            match self.handle.block_on(task) {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => writeln!(self.out, "Processing archived messages: {e}")?,
                Err(e) => writeln!(self.out, "Processing archived messages for {label}: {e}")?,
            }
        }
        Ok(())
    }
}

fn describe(session: &SessionSnapshot) -> String {
    let pid = session.viewer_pid.as_deref().unwrap_or("pending");
    format!("{} (port {}, pid {pid})", session.label(), session.port)
}

/// Start the interactive console on its own thread. The receiver resolves
/// when the operator exits or the console fails.
pub fn spawn_console(service: Arc<WatchService>, handle: Handle) -> Result<oneshot::Receiver<()>> {
    let (tx, rx) = oneshot::channel();
    std::thread::Builder::new()
        .name("console".into())
        .spawn(move || {
            let console = Console::new(DialoguerPrompter, std::io::stdout(), service, handle);
            if let Err(e) = console.run() {
                error!(error = %e, "Console stopped");
            }
            let _ = tx.send(());
        })
        .context("Failed to start console thread")?;
    Ok(rx)
}
