use std::error::Error;

use scribe_channel::Channel;
use scribe_channel::ChannelConfig;
use scribe_channel::Frame;
use scribe_core::config::Config;
use scribe_core::protocol::decode_message;
use scribe_core::ChatEntryId;
use scribe_core::Effect;
use scribe_core::Notice;
use scribe_core::NoticeLevel;
use scribe_core::RuntimeAction;
use scribe_core::SessionAction;
use scribe_core::SessionStore;
use scribe_core::UserAction;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::warn;

use crate::commands::Command;
use crate::commands::Input;
use crate::commands::InputState;
use crate::commands::HELP;
use crate::notifier;
use crate::view;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// The single consumer: every stdin line, status change, frame and timeout
/// becomes exactly one dispatch, handled to completion before the next.
struct App {
    store: SessionStore,
    channel: Channel,
    notices: mpsc::UnboundedSender<Notice>,
    timeouts: mpsc::UnboundedSender<u64>,
    input: InputState,
    context: Option<String>,
    last_printed: Option<ChatEntryId>,
}

pub async fn run(config: Config) -> Result<(), Box<dyn Error>> {
    let channel = Channel::new(
        &config.server.url,
        ChannelConfig {
            reconnect_delay: config.server.reconnect_delay(),
            connect_timeout: config.server.connect_timeout(),
        },
    )?;

    let (notice_tx, notice_rx) = mpsc::unbounded_channel();
    let notifier = notifier::spawn(notice_rx);
    let (timeout_tx, mut timeout_rx) = mpsc::unbounded_channel();
    let mut status_rx = channel.watch_status();
    let mut frames_rx = channel.watch_messages();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let mut app = App::new(
        SessionStore::new(config.session.clone()),
        channel.clone(),
        notice_tx,
        timeout_tx,
    );

    println!("scribe {} connecting to {}", env!("CARGO_PKG_VERSION"), channel.url());
    println!("type /help for commands");
    if let Err(error) = channel.connect().await {
        app.notify(Notice::new(
            NoticeLevel::Warning,
            format!("could not connect ({error}); retrying"),
        ));
    }

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    if app.input.is_editing() {
                        println!("input closed; unfinished /edit discarded");
                    }
                    break;
                };
                if app.handle_line(&line).await == Flow::Quit {
                    break;
                }
            }
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = *status_rx.borrow_and_update();
                app.dispatch(RuntimeAction::ConnectionChanged(status).into()).await;
            }
            changed = frames_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let frame = frames_rx.borrow_and_update().clone();
                if let Some(frame) = frame {
                    app.receive(frame).await;
                }
            }
            Some(generation) = timeout_rx.recv() => {
                app.dispatch(RuntimeAction::RequestTimedOut { generation }.into()).await;
            }
        }
    }

    channel.close().await;
    drop(app);
    if let Err(error) = notifier.await {
        warn!("notifier task failed: {}", error);
    }
    Ok(())
}

impl App {
    fn new(
        store: SessionStore,
        channel: Channel,
        notices: mpsc::UnboundedSender<Notice>,
        timeouts: mpsc::UnboundedSender<u64>,
    ) -> Self {
        Self {
            store,
            channel,
            notices,
            timeouts,
            input: InputState::default(),
            context: None,
            last_printed: None,
        }
    }

    async fn receive(&mut self, frame: Frame) {
        debug!("handling frame #{}", frame.seq);
        let action = match decode_message(&frame.text) {
            Ok(message) => RuntimeAction::MessageReceived(message),
            Err(error) => {
                warn!("malformed frame #{}: {}", frame.seq, error);
                RuntimeAction::MalformedMessage {
                    reason: error.to_string(),
                }
            }
        };
        self.dispatch(action.into()).await;
    }

    /// Returns whether the action produced a request for the agent.
    async fn dispatch(&mut self, action: SessionAction) -> bool {
        let effects = self.store.dispatch(action);
        let sent = effects
            .iter()
            .any(|effect| matches!(effect, Effect::Send(_)));
        self.execute(effects).await;
        self.print_new_entries();
        sent
    }

    async fn execute(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Send(request) => match self.channel.send(&request).await {
                    Ok(true) => debug!("sent {}", request.action()),
                    Ok(false) => warn!("{} dropped: not connected", request.action()),
                    Err(error) => warn!("{} failed: {}", request.action(), error),
                },
                Effect::Notify(notice) => self.notify(notice),
                Effect::ArmRequestTimeout { generation, after } => {
                    let timeouts = self.timeouts.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(after).await;
                        // The loop has exited if this fails; nothing is waiting.
                        let _ = timeouts.send(generation);
                    });
                }
            }
        }
    }

    fn notify(&self, notice: Notice) {
        if self.notices.send(notice).is_err() {
            warn!("notifier stopped; notice dropped");
        }
    }

    fn print_new_entries(&mut self) {
        let state = self.store.state();
        let fresh: Vec<String> = state
            .log()
            .iter()
            .filter(|entry| self.last_printed.map_or(true, |last| entry.id > last))
            .map(view::render_entry)
            .collect();
        if let Some(last) = state.log().last() {
            self.last_printed = Some(last.id);
        }
        for line in fresh {
            println!("{line}");
        }
    }

    async fn handle_line(&mut self, line: &str) -> Flow {
        let input = match self.input.feed(line) {
            Ok(Some(input)) => input,
            Ok(None) => return Flow::Continue,
            Err(error) => {
                println!("{error}");
                return Flow::Continue;
            }
        };

        let command = match input {
            Input::Edited(text) => {
                match self.store.state().active_file().map(str::to_string) {
                    Some(filename) => {
                        self.dispatch(UserAction::Edit { filename, text }.into())
                            .await;
                    }
                    None => println!("no file open; use /open NAME"),
                }
                return Flow::Continue;
            }
            Input::Command(command) => command,
        };

        let state = self.store.state();
        match command {
            Command::Empty => {}
            Command::Files => println!("{}", view::render_files(state)),
            Command::Show => {
                println!("{}", view::render_active(state));
                println!("{}", view::render_status(state));
            }
            Command::Log => println!("{}", view::render_log(state)),
            Command::Diagnostics => println!("{}", view::render_diagnostics(state)),
            Command::Help => println!("{HELP}"),
            Command::Quit => return Flow::Quit,
            Command::BeginEdit => println!("enter text; finish with a line holding '.'"),
            Command::Open(filename) => {
                self.dispatch(UserAction::SelectFile(filename).into()).await;
            }
            Command::Save => {
                self.dispatch(UserAction::Save.into()).await;
            }
            Command::Accept(filename) => {
                if let Some(filename) = filename.or_else(|| active(state)) {
                    self.dispatch(UserAction::AcceptDiff { filename }.into())
                        .await;
                }
            }
            Command::Reject(filename) => {
                if let Some(filename) = filename.or_else(|| active(state)) {
                    self.dispatch(UserAction::RejectDiff { filename }.into())
                        .await;
                }
            }
            Command::Diff(prompt) => {
                let context = self.context.clone();
                self.dispatch(UserAction::RequestDiff { prompt, context }.into())
                    .await;
            }
            Command::Context(context) => {
                let update = UserAction::UpdateContext {
                    context: context.clone(),
                };
                if self.dispatch(update.into()).await {
                    self.context = Some(context);
                }
            }
            Command::Refresh => {
                self.dispatch(UserAction::RefreshFiles.into()).await;
            }
            Command::Prompt(text) => {
                let context = self.context.clone();
                self.dispatch(UserAction::SubmitPrompt { text, context }.into())
                    .await;
            }
        }
        Flow::Continue
    }
}

fn active(state: &scribe_core::SessionState) -> Option<String> {
    state.active_file().map(str::to_string)
}
