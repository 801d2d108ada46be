//! IRC channel: plain TCP line protocol with registration, PING replies, flood-protected sends
//! and a bounded reconnect loop.

use crate::channels::{IrcHandle, TransportError};
use crate::config::BotConfig;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Longest PRIVMSG body sent in one line; longer text is split.
const MAX_MESSAGE_BYTES: usize = 400;
const CTCP_DELIM: char = '\u{1}';
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Longest inbound line accepted; anything longer drops the connection.
const MAX_LINE_BYTES: usize = 8 * 1024;

/// Events delivered to the relay session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrcEvent {
    /// Welcome (001) received; the connection is usable. `nick` is the nickname the server
    /// assigned, which differs from the configured one after a collision.
    Registered { nick: String, message: String },
    Message { author: String, target: String, text: String },
    Notice { author: String, target: String, text: String },
    /// CTCP ACTION (`/me`).
    Action { author: String, target: String, text: String },
    Invite { channel: String, from: String },
    Error(String),
}

/// One parsed protocol line: `[@tags] [:prefix] COMMAND params... [:trailing]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcLine {
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl IrcLine {
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']);
        if let Some(tagged) = rest.strip_prefix('@') {
            rest = tagged.split_once(' ')?.1.trim_start_matches(' ');
        }
        let prefix = match rest.strip_prefix(':') {
            Some(prefixed) => {
                let (prefix, after) = prefixed.split_once(' ')?;
                rest = after.trim_start_matches(' ');
                Some(prefix.to_string())
            }
            None => None,
        };
        let (command, mut rest) = rest.split_once(' ').unwrap_or((rest, ""));
        if command.is_empty() {
            return None;
        }
        let mut params = Vec::new();
        loop {
            rest = rest.trim_start_matches(' ');
            if rest.is_empty() {
                break;
            }
            if let Some(trailing) = rest.strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }
            match rest.split_once(' ') {
                Some((param, after)) => {
                    params.push(param.to_string());
                    rest = after;
                }
                None => {
                    params.push(rest.to_string());
                    break;
                }
            }
        }
        Some(Self {
            prefix,
            command: command.to_ascii_uppercase(),
            params,
        })
    }

    /// Nickname from a `nick!user@host` prefix. Server prefixes yield None.
    pub fn nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        match prefix.split_once('!') {
            Some((nick, _)) => Some(nick),
            None if prefix.contains('.') => None,
            None => Some(prefix),
        }
    }

    fn param(&self, i: usize) -> Option<&str> {
        self.params.get(i).map(String::as_str)
    }
}

/// Map a protocol line to a relay event. PING and nick collisions are handled by the connection.
pub(crate) fn event_for(line: &IrcLine) -> Option<IrcEvent> {
    match line.command.as_str() {
        "001" => Some(IrcEvent::Registered {
            nick: line.param(0)?.to_string(),
            message: line.params.last().cloned().unwrap_or_default(),
        }),
        "PRIVMSG" => {
            let author = line.nick()?.to_string();
            let target = line.param(0)?.to_string();
            let text = line.param(1)?;
            match ctcp_body(text) {
                Some(body) => {
                    let action = body.strip_prefix("ACTION").filter(|rest| {
                        rest.is_empty() || rest.starts_with(' ')
                    })?;
                    Some(IrcEvent::Action {
                        author,
                        target,
                        text: action.trim_start_matches(' ').to_string(),
                    })
                }
                None => Some(IrcEvent::Message {
                    author,
                    target,
                    text: text.to_string(),
                }),
            }
        }
        "NOTICE" => {
            let author = line.nick()?.to_string();
            let text = line.param(1)?;
            if ctcp_body(text).is_some() {
                return None;
            }
            Some(IrcEvent::Notice {
                author,
                target: line.param(0)?.to_string(),
                text: text.to_string(),
            })
        }
        "INVITE" => Some(IrcEvent::Invite {
            channel: line.param(1)?.to_string(),
            from: line.nick().unwrap_or_default().to_string(),
        }),
        "ERROR" => Some(IrcEvent::Error(line.params.join(" "))),
        "433" => None,
        cmd if is_error_numeric(cmd) => Some(IrcEvent::Error(format!(
            "{} {}",
            cmd,
            line.params.join(" ")
        ))),
        _ => None,
    }
}

fn is_error_numeric(command: &str) -> bool {
    command.len() == 3
        && command.bytes().all(|b| b.is_ascii_digit())
        && matches!(command.as_bytes()[0], b'4' | b'5')
}

fn ctcp_body(text: &str) -> Option<&str> {
    let body = text.strip_prefix(CTCP_DELIM)?;
    Some(body.strip_suffix(CTCP_DELIM).unwrap_or(body))
}

/// Build a raw line from an argument list; the last argument becomes trailing when needed.
pub(crate) fn format_raw(args: &[String]) -> Option<String> {
    let (last, init) = args.split_last()?;
    let mut parts: Vec<String> = init.to_vec();
    if last.is_empty() || last.starts_with(':') || last.contains(char::is_whitespace) {
        parts.push(format!(":{}", last));
    } else {
        parts.push(last.clone());
    }
    Some(parts.join(" "))
}

/// Split text at line breaks, then at char boundaries so no piece exceeds `max` bytes.
pub(crate) fn split_message(text: &str, max: usize) -> Vec<&str> {
    let mut out = Vec::new();
    for line in text.split(['\r', '\n']).filter(|l| !l.is_empty()) {
        let mut rest = line;
        while rest.len() > max {
            let mut cut = max;
            while !rest.is_char_boundary(cut) {
                cut -= 1;
            }
            let (head, tail) = rest.split_at(cut);
            out.push(head);
            rest = tail;
        }
        if !rest.is_empty() {
            out.push(rest);
        }
    }
    out
}

/// Connection settings for [`IrcClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcConnectOptions {
    pub server: String,
    pub port: u16,
    pub nickname: String,
    pub user_name: String,
    pub real_name: String,
    /// Channels joined after every registration, keys included.
    pub channels: Vec<String>,
    pub flood_protection: bool,
    pub flood_protection_delay: Duration,
    pub retry_count: u32,
    pub retry_delay: Duration,
}

impl IrcConnectOptions {
    pub fn from_config(config: &BotConfig) -> Self {
        let o = &config.irc_options;
        Self {
            server: config.server.clone(),
            port: o.port,
            nickname: config.nickname.clone(),
            user_name: o.user_name.clone().unwrap_or_else(|| config.nickname.clone()),
            real_name: o.real_name.clone().unwrap_or_else(|| config.nickname.clone()),
            channels: config.irc_join_list(),
            flood_protection: o.flood_protection,
            flood_protection_delay: Duration::from_millis(o.flood_protection_delay),
            retry_count: o.retry_count,
            retry_delay: Duration::from_millis(o.retry_delay),
        }
    }
}

enum ConnectionEnd {
    Shutdown,
    EventsClosed,
    Dropped,
}

/// IRC connector: one TCP connection at a time, reconnecting up to `retry_count` times.
pub struct IrcClient {
    options: IrcConnectOptions,
    outbound: mpsc::UnboundedSender<String>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    shutdown: watch::Sender<bool>,
}

impl IrcClient {
    pub fn new(options: IrcConnectOptions) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        Self {
            options,
            outbound,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            shutdown,
        }
    }

    fn running(&self) -> bool {
        !*self.shutdown.borrow()
    }

    /// Start the connection loop and forward events to the session.
    /// Returns a handle to await on shutdown.
    pub fn start(self: Arc<Self>, events: mpsc::Sender<IrcEvent>) -> JoinHandle<()> {
        log::info!(
            "irc channel: connecting to {}:{} as {}",
            self.options.server,
            self.options.port,
            self.options.nickname
        );
        tokio::spawn(async move {
            run_connection_loop(self, events).await;
        })
    }

    /// Queue a raw line. Lines are written once the connection is registered.
    fn enqueue(&self, line: String) -> Result<(), TransportError> {
        self.outbound.send(line).map_err(|_| TransportError::Closed)
    }

    fn take_outbound(&self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.outbound_rx.lock().ok()?.take()
    }
}

/// Read one line into `buf`, refusing lines longer than [`MAX_LINE_BYTES`]. Bytes left in
/// `buf` by a cancelled read count towards the limit.
async fn read_line_capped<R>(reader: &mut R, buf: &mut Vec<u8>) -> Result<usize, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    let remaining = MAX_LINE_BYTES.saturating_sub(buf.len()) as u64;
    let read = (&mut *reader).take(remaining).read_until(b'\n', buf).await?;
    if buf.len() >= MAX_LINE_BYTES && buf.last() != Some(&b'\n') {
        return Err(TransportError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("line longer than {} bytes", MAX_LINE_BYTES),
        )));
    }
    Ok(read)
}

async fn write_line(writer: &mut OwnedWriteHalf, line: &str) -> Result<(), TransportError> {
    log::trace!("irc >> {}", line);
    writer.write_all(format!("{}\r\n", line).as_bytes()).await?;
    Ok(())
}

async fn run_connection_loop(client: Arc<IrcClient>, events: mpsc::Sender<IrcEvent>) {
    let Some(mut outbound_rx) = client.take_outbound() else {
        log::error!("irc channel: connection loop already started");
        return;
    };
    let mut shutdown = client.shutdown.subscribe();
    let mut failures: u32 = 0;
    while client.running() {
        let mut registered = false;
        let end = run_connection(
            &client,
            &events,
            &mut outbound_rx,
            &mut shutdown,
            &mut registered,
        )
        .await;
        match end {
            Ok(ConnectionEnd::Shutdown) | Ok(ConnectionEnd::EventsClosed) => break,
            Ok(ConnectionEnd::Dropped) => {
                log::warn!("irc: connection to {} closed", client.options.server);
            }
            Err(e) => {
                log::warn!("irc: connection to {} failed: {}", client.options.server, e);
                if events.send(IrcEvent::Error(e.to_string())).await.is_err() {
                    break;
                }
            }
        }
        if registered {
            failures = 0;
        }
        failures += 1;
        if failures > client.options.retry_count {
            log::error!(
                "irc: giving up on {} after {} reconnect attempts",
                client.options.server,
                client.options.retry_count
            );
            break;
        }
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(client.options.retry_delay) => {}
        }
    }
    log::info!("irc channel: connection loop stopped");
}

/// One TCP connection: register, answer PINGs, emit events, drain the outbound queue.
async fn run_connection(
    client: &IrcClient,
    events: &mpsc::Sender<IrcEvent>,
    outbound_rx: &mut mpsc::UnboundedReceiver<String>,
    shutdown: &mut watch::Receiver<bool>,
    registered: &mut bool,
) -> Result<ConnectionEnd, TransportError> {
    let opts = &client.options;
    let stream = tokio::time::timeout(
        CONNECT_TIMEOUT,
        TcpStream::connect((opts.server.as_str(), opts.port)),
    )
    .await
    .map_err(|_| TransportError::Timeout)??;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut nick = opts.nickname.clone();

    write_line(&mut writer, &format!("NICK {}", nick)).await?;
    write_line(
        &mut writer,
        &format!("USER {} 8 * :{}", opts.user_name, opts.real_name),
    )
    .await?;

    let mut next_send = Instant::now();
    loop {
        let throttled = Instant::now() < next_send;
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = write_line(&mut writer, "QUIT :relay shutting down").await;
                return Ok(ConnectionEnd::Shutdown);
            }
            read = read_line_capped(&mut reader, &mut buf) => {
                if read? == 0 {
                    return Ok(ConnectionEnd::Dropped);
                }
                let raw = String::from_utf8_lossy(&buf).into_owned();
                buf.clear();
                log::trace!("irc << {}", raw.trim_end());
                let Some(line) = IrcLine::parse(&raw) else { continue };
                match line.command.as_str() {
                    "PING" => {
                        let token = line.params.join(" ");
                        write_line(&mut writer, &format!("PONG :{}", token)).await?;
                        continue;
                    }
                    "001" => {
                        *registered = true;
                        if let Some(assigned) = line.params.first() {
                            nick = assigned.clone();
                        }
                        for channel in &opts.channels {
                            write_line(&mut writer, &format!("JOIN {}", channel)).await?;
                        }
                    }
                    "433" if !*registered => {
                        nick.push('_');
                        log::info!("irc: nickname in use, retrying as {}", nick);
                        write_line(&mut writer, &format!("NICK {}", nick)).await?;
                    }
                    _ => {}
                }
                if let Some(event) = event_for(&line) {
                    if events.send(event).await.is_err() {
                        return Ok(ConnectionEnd::EventsClosed);
                    }
                }
            }
            out = outbound_rx.recv(), if *registered && !throttled => {
                let Some(out) = out else {
                    return Ok(ConnectionEnd::Shutdown);
                };
                write_line(&mut writer, &out).await?;
                if opts.flood_protection {
                    next_send = Instant::now() + opts.flood_protection_delay;
                }
            }
            _ = tokio::time::sleep_until(next_send), if throttled => {}
        }
    }
}

#[async_trait]
impl IrcHandle for IrcClient {
    async fn say(&self, target: &str, text: &str) -> Result<(), TransportError> {
        for piece in split_message(text, MAX_MESSAGE_BYTES) {
            self.enqueue(format!("PRIVMSG {} :{}", target, piece))?;
        }
        Ok(())
    }

    async fn join(&self, channel: &str) -> Result<(), TransportError> {
        self.enqueue(format!("JOIN {}", channel))
    }

    async fn send_raw(&self, args: &[String]) -> Result<(), TransportError> {
        match format_raw(args) {
            Some(line) => self.enqueue(line),
            None => Ok(()),
        }
    }

    fn stop(&self) {
        self.shutdown.send_replace(true);
    }
}
