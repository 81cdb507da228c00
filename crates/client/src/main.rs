//! Captain - headless driver console
//!
//! Connects as a driver, goes online and shows incoming ride offers.
//! Commands on stdin: `a` accept, `r` reject, `o` toggle online, `q` quit.

use anyhow::{anyhow, Context, Result};
use captain_client::{
    logging, ApiClient, AuthSession, ClientConfig, ConnectionState, DriverSession,
    DriverSessionState, ReconnectingChannel, Storage,
};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let config = ClientConfig::from_env().context("invalid configuration")?;
    let api = ApiClient::from_config(&config).context("failed to build HTTP client")?;

    let auth = match Storage::default_location() {
        Some(storage) => AuthSession::restore(storage),
        None => AuthSession::default(),
    };
    if !auth.is_authenticated() {
        let phone = std::env::var("CAPTAIN_PHONE")
            .context("no stored session; set CAPTAIN_PHONE and CAPTAIN_PASSWORD")?;
        let password = std::env::var("CAPTAIN_PASSWORD").context("CAPTAIN_PASSWORD is not set")?;
        let profile = auth
            .login(&api, &phone, &password)
            .await
            .map_err(|e| anyhow!("login failed: {}", e.user_message()))?;
        println!("Logged in as {}", profile.name.as_deref().unwrap_or(&profile.id));
    }

    let channel = ReconnectingChannel::new(config.channel.clone());
    let session = DriverSession::new(auth, api, config.decision_window_secs);
    session.bind(&channel);
    session.connect();

    let mut connection = channel.watch_state();
    let connected = tokio::time::timeout(
        config.channel.connect_timeout,
        connection.wait_for(ConnectionState::is_connected),
    )
    .await;
    if !matches!(connected, Ok(Ok(_))) {
        tracing::warn!("channel not connected yet; going online locally");
    }
    session.go_online();

    let mut states = session.subscribe();
    let mut previous = DriverSessionState::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                render(&previous, &state);
                previous = state;
            }
            line = lines.next_line() => {
                let Some(command) = line.context("failed to read stdin")? else {
                    break;
                };
                match command.trim() {
                    "a" => {
                        // The HTTP accept may take up to the request timeout.
                        let session = session.clone();
                        tokio::spawn(async move { session.accept_pending().await });
                    }
                    "r" => session.reject_pending(),
                    "o" => {
                        session.toggle_online();
                    }
                    "q" => break,
                    "" => {}
                    other => println!("unknown command {other:?} (a = accept, r = reject, o = online/offline, q = quit)"),
                }
            }
        }
    }

    session.go_offline();
    channel.shutdown().await;
    Ok(())
}

fn render(previous: &DriverSessionState, state: &DriverSessionState) {
    if previous.connection != state.connection {
        println!("connection: {:?}", state.connection);
    }
    if previous.is_online != state.is_online {
        println!("{}", if state.is_online { "ONLINE" } else { "OFFLINE" });
    }

    let previous_id = previous.pending_offer.as_ref().map(|o| o.id());
    match &state.pending_offer {
        Some(offer) if previous_id != Some(offer.id()) => {
            println!(
                "new ride {}: {} -> {} | fare {:.2}{}",
                offer.ride_id(),
                offer.pickup_address(),
                offer.dropoff_address(),
                offer.fare(),
                offer
                    .distance_km()
                    .map(|d| format!(" | {d:.1} km"))
                    .unwrap_or_default(),
            );
        }
        Some(_) => {
            if let Some(secs) = state.decision_seconds_remaining {
                if secs <= 5 || secs % 10 == 0 {
                    println!("  {secs}s to decide");
                }
            }
        }
        None if previous_id.is_some() => println!("offer closed"),
        None => {}
    }
}
