//! TCP wire adapters: the state publishing socket and the command
//! socket.
//!
//! Frames are JSON arrays, one message per line. The state socket
//! pushes `["state", {...}]`, `["rip_state", {...}]` and `["disc",
//! {...}|null]` to every subscriber; a new subscriber first gets the
//! most recent disc, state and rip state so it doesn't have to wait
//! for the next change. The command socket takes one command per
//! line, arguments separated by whitespace, and answers each with a
//! single reply frame.

use std::sync::{Arc, Mutex};

use crossbeam_channel::{bounded, Receiver, Sender};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use cod_playback::{Command, CommandError, CommandRequest, Publication, Reply};

/// Serialise one publication as a wire line.
fn publication_line(publication: &Publication) -> String {
    match publication {
        Publication::State(state) => json!(["state", state]).to_string(),
        Publication::RipState(rip) => json!(["rip_state", rip]).to_string(),
        Publication::Disc(disc) => json!(["disc", disc]).to_string(),
    }
}

/// Serialise one command result as a wire line.
fn reply_line(result: &Result<Reply, CommandError>) -> String {
    match result {
        Ok(Reply::State(state)) => json!(["state", state]).to_string(),
        Ok(Reply::RipState(rip)) => json!(["rip_state", rip]).to_string(),
        Ok(Reply::Disc(disc)) => json!(["disc", disc]).to_string(),
        Ok(Reply::Ok(None)) => json!(["ok"]).to_string(),
        Ok(Reply::Ok(Some(value))) => json!(["ok", value]).to_string(),
        Err(e) => json!(["error", e.to_string()]).to_string(),
    }
}

/// The most recent line of each kind, replayed to new subscribers.
#[derive(Default)]
struct LastSeen {
    disc: Option<String>,
    state: Option<String>,
    rip_state: Option<String>,
}

/// Serve the state topic: fan publications out to every connected
/// subscriber.
pub async fn serve_state(
    listener: TcpListener,
    publications: Receiver<Publication>,
) -> anyhow::Result<()> {
    let (fanout, _) = broadcast::channel::<String>(256);
    let last = Arc::new(Mutex::new(LastSeen::default()));

    // Bridge the player's channel into the async world
    {
        let fanout = fanout.clone();
        let last = Arc::clone(&last);
        tokio::task::spawn_blocking(move || {
            while let Ok(publication) = publications.recv() {
                let line = publication_line(&publication);
                {
                    let mut last = last.lock().unwrap();
                    match &publication {
                        Publication::Disc(_) => last.disc = Some(line.clone()),
                        Publication::State(_) => last.state = Some(line.clone()),
                        Publication::RipState(_) => last.rip_state = Some(line.clone()),
                    }
                }
                // No subscribers is fine
                let _ = fanout.send(line);
            }
        });
    }

    loop {
        let (socket, addr) = listener.accept().await?;
        debug!(%addr, "state subscriber connected");

        let rx = fanout.subscribe();
        let last = Arc::clone(&last);
        tokio::spawn(async move {
            if let Err(e) = serve_subscriber(socket, rx, last).await {
                debug!(%addr, error = %e, "state subscriber gone");
            }
        });
    }
}

async fn serve_subscriber(
    mut socket: TcpStream,
    mut rx: broadcast::Receiver<String>,
    last: Arc<Mutex<LastSeen>>,
) -> anyhow::Result<()> {
    // Replay the current situation first
    let replay: Vec<String> = {
        let last = last.lock().unwrap();
        [&last.disc, &last.state, &last.rip_state]
            .into_iter()
            .flatten()
            .cloned()
            .collect()
    };

    for line in replay {
        socket.write_all(line.as_bytes()).await?;
        socket.write_all(b"\n").await?;
    }

    loop {
        match rx.recv().await {
            Ok(line) => {
                socket.write_all(line.as_bytes()).await?;
                socket.write_all(b"\n").await?;
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "state subscriber lagging, frames dropped");
            }
            Err(broadcast::error::RecvError::Closed) => return Ok(()),
        }
    }
}

/// Serve the command socket: one command per line, one reply frame
/// per command.
pub async fn serve_commands(
    listener: TcpListener,
    commands: Sender<CommandRequest>,
) -> anyhow::Result<()> {
    loop {
        let (socket, addr) = listener.accept().await?;
        debug!(%addr, "command connection");

        let commands = commands.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_commander(socket, commands).await {
                debug!(%addr, error = %e, "command connection gone");
            }
        });
    }
}

async fn serve_commander(
    socket: TcpStream,
    commands: Sender<CommandRequest>,
) -> anyhow::Result<()> {
    let (read, mut write) = socket.into_split();
    let mut lines = BufReader::new(read).lines();

    while let Some(line) = lines.next_line().await? {
        let parts: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        if parts.is_empty() {
            continue;
        }

        let result = match Command::parse(&parts) {
            Err(e) => Err(e),
            Ok(command) => dispatch(&commands, command).await,
        };

        let line = reply_line(&result);
        write.write_all(line.as_bytes()).await?;
        write.write_all(b"\n").await?;
    }

    Ok(())
}

/// Hand a command to the player thread and wait for its reply.
async fn dispatch(
    commands: &Sender<CommandRequest>,
    command: Command,
) -> Result<Reply, CommandError> {
    let (reply_tx, reply_rx) = bounded(1);

    commands
        .send(CommandRequest {
            command,
            reply: Some(reply_tx),
        })
        .map_err(|_| CommandError::new("player is not running"))?;

    tokio::task::spawn_blocking(move || reply_rx.recv())
        .await
        .map_err(|_| CommandError::new("player reply lost"))?
        .map_err(|_| CommandError::new("player is not running"))?
}

pub fn log_endpoints(state: &std::net::SocketAddr, command: &std::net::SocketAddr) {
    info!(%state, "publishing state");
    info!(%command, "receiving commands");
}

#[cfg(test)]
mod tests {
    use super::*;
    use cod_core::{PlayerState, RipState, State};

    #[test]
    fn publication_frames_have_the_wire_shape() {
        let state = State {
            state: PlayerState::Play,
            disc_id: Some("id".into()),
            track: 1,
            no_tracks: 2,
            index: 1,
            position: 7,
            length: 180,
            ..State::default()
        };

        let line = publication_line(&Publication::State(state));
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();

        assert_eq!(value[0], "state");
        assert_eq!(value[1]["state"], "PLAY");
        assert_eq!(value[1]["position"], 7);

        let line = publication_line(&Publication::Disc(None));
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value[0], "disc");
        assert!(value[1].is_null());

        let line = publication_line(&Publication::RipState(RipState::default()));
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value[0], "rip_state");
        assert_eq!(value[1]["state"], "INACTIVE");
    }

    #[test]
    fn reply_frames_cover_all_variants() {
        let line = reply_line(&Ok(Reply::Ok(None)));
        assert_eq!(line, r#"["ok"]"#);

        let line = reply_line(&Ok(Reply::Ok(Some(json!("2.0.0")))));
        assert_eq!(line, r#"["ok","2.0.0"]"#);

        let line = reply_line(&Err(CommandError::new("unknown command: xyzzy")));
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value[0], "error");
        assert_eq!(value[1], "unknown command: xyzzy");

        let line = reply_line(&Ok(Reply::Disc(None)));
        assert_eq!(line, r#"["disc",null]"#);
    }
}
