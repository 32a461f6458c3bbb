//! The CAS TCP session: single long-lived owner task driving
//! `DISCONNECTED -> CONNECTING -> AWAITING_CHALLENGE -> AWAITING_AUTH_RESULT
//! -> ACTIVE -> DISCONNECTED`.
//!
//! Modeled as an encapsulated session object rather than the source's
//! process-wide singleton: one task owns the socket and the timers, and
//! exposes a cheap [`SessionHandle`] (an `Arc<RwLock<SessionState>>` plus a
//! send-frame channel) to the rest of the process.

use crate::config::Config;
use crate::error::DisasterIngestError;
use crate::inbound;
use cas_wire::{build_envelope, parse_envelope, Deframer, Envelope, FrameError, FrameHeader, MessageId};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    AwaitingChallenge,
    AwaitingAuthResult,
    Active,
}

/// Outbound frame a sender task wants written to the CAS socket. No-ops
/// (dropped) if the session is not `ACTIVE` when it reaches the driver.
pub struct SendFrame {
    pub header: FrameHeader,
    pub body: Vec<u8>,
}

/// A dispatched inbound message, handed to the rest of the process.
pub enum Inbound {
    DisasterNotify { header: FrameHeader, envelope: Envelope },
    ReportAck { header: FrameHeader, envelope: Envelope },
}

#[derive(Clone)]
pub struct SessionHandle {
    state: Arc<RwLock<SessionState>>,
    send_tx: mpsc::Sender<SendFrame>,
}

impl SessionHandle {
    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    pub async fn is_active(&self) -> bool {
        self.state().await == SessionState::Active
    }

    /// No-ops if the connection is not ACTIVE.
    pub async fn send(&self, frame: SendFrame) -> bool {
        if !self.is_active().await {
            return false;
        }
        self.send_tx.send(frame).await.is_ok()
    }
}

pub async fn run(
    config: Arc<Config>,
    inbound_tx: mpsc::Sender<Inbound>,
    shutdown: watch::Receiver<bool>,
) -> (SessionHandle, tokio::task::JoinHandle<()>) {
    let state = Arc::new(RwLock::new(SessionState::Disconnected));
    let (send_tx, send_rx) = mpsc::channel(64);
    let should_reconnect = Arc::new(AtomicBool::new(true));

    let handle = SessionHandle {
        state: state.clone(),
        send_tx,
    };

    let driver = tokio::spawn(driver_loop(config, state, send_rx, inbound_tx, shutdown, should_reconnect));

    (handle, driver)
}

async fn driver_loop(
    config: Arc<Config>,
    state: Arc<RwLock<SessionState>>,
    mut send_rx: mpsc::Receiver<SendFrame>,
    inbound_tx: mpsc::Sender<Inbound>,
    mut shutdown: watch::Receiver<bool>,
    should_reconnect: Arc<AtomicBool>,
) {
    loop {
        if *shutdown.borrow() {
            return;
        }

        *state.write().await = SessionState::Connecting;
        let stream = match TcpStream::connect(config.cas_addr()).await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "CAS connect failed");
                *state.write().await = SessionState::Disconnected;
                if !wait_for_reconnect(config.t_recon, &mut shutdown).await {
                    return;
                }
                continue;
            }
        };

        match run_active_session(&config, stream, &state, &mut send_rx, &inbound_tx, &mut shutdown).await {
            SessionExit::Shutdown => return,
            SessionExit::Disconnected => {
                *state.write().await = SessionState::Disconnected;
                if !should_reconnect.load(Ordering::SeqCst) {
                    return;
                }
                if !wait_for_reconnect(config.t_recon, &mut shutdown).await {
                    return;
                }
            }
        }
    }
}

enum SessionExit {
    Shutdown,
    Disconnected,
}

async fn wait_for_reconnect(t_recon: std::time::Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(t_recon) => true,
        _ = shutdown.changed() => !*shutdown.borrow(),
    }
}

async fn run_active_session(
    config: &Arc<Config>,
    mut stream: TcpStream,
    state: &Arc<RwLock<SessionState>>,
    send_rx: &mut mpsc::Receiver<SendFrame>,
    inbound_tx: &mpsc::Sender<Inbound>,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionExit {
    *state.write().await = SessionState::AwaitingChallenge;

    let hello = Envelope {
        dest_id: Some(config.cas_dest_id.clone()),
        ..Default::default()
    };
    if write_frame(&mut stream, config.cas_magic_number, MessageId::EtsReqSysCon, &hello).await.is_err() {
        return SessionExit::Disconnected;
    }

    let mut deframer = Deframer::new(config.cas_magic_number);
    let mut read_buf = vec![0u8; 64 * 1024];
    let mut t_resp_deadline: Option<tokio::time::Instant> = Some(tokio::time::Instant::now() + config.t_resp);
    let mut t_pong_deadline: Option<tokio::time::Instant> = None;
    let mut t_sess = tokio::time::interval(config.t_sess);
    t_sess.tick().await;

    loop {
        let t_resp_sleep = async {
            match t_resp_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => futures_pending().await,
            }
        };
        let t_pong_sleep = async {
            match t_pong_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => futures_pending().await,
            }
        };

        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() { return SessionExit::Shutdown; }
            }
            n = stream.read(&mut read_buf) => {
                match n {
                    Ok(0) => { warn!("CAS closed the connection"); return SessionExit::Disconnected; }
                    Ok(n) => {
                        deframer.feed(&read_buf[..n]);
                        loop {
                            match deframer.next_frame() {
                                Ok(Some((header, body))) => {
                                    let is_active = matches!(*state.read().await, SessionState::Active);
                                    match handle_frame(config, &mut stream, state, header, body, inbound_tx, &mut t_resp_deadline, &mut t_pong_deadline, is_active).await {
                                        Ok(true) => {}
                                        Ok(false) => return SessionExit::Disconnected,
                                        Err(_) => return SessionExit::Disconnected,
                                    }
                                }
                                Ok(None) => break,
                                Err(FrameError::BadMagic { .. }) | Err(FrameError::BodyTooLarge(_)) => {
                                    warn!("framing error, buffer purged, connection continues");
                                }
                            }
                        }
                    }
                    Err(e) => { warn!(error = %e, "CAS socket read error"); return SessionExit::Disconnected; }
                }
            }
            () = t_resp_sleep, if t_resp_deadline.is_some() => {
                warn!("T_resp expired awaiting CAS auth response");
                return SessionExit::Disconnected;
            }
            () = t_pong_sleep, if t_pong_deadline.is_some() => {
                warn!("T_pong expired, CAS did not answer liveness check");
                return SessionExit::Disconnected;
            }
            _ = t_sess.tick(), if matches!(*state.read().await, SessionState::Active) => {
                let ping = Envelope {
                    dest_id: Some(config.cas_dest_id.clone()),
                    cmd: Some("alive".to_owned()),
                    time: Some(Utc::now().to_rfc3339()),
                    ..Default::default()
                };
                if write_frame(&mut stream, config.cas_magic_number, MessageId::EtsReqSysSts, &ping).await.is_err() {
                    return SessionExit::Disconnected;
                }
                t_pong_deadline = Some(tokio::time::Instant::now() + config.t_pong);
            }
            Some(frame) = send_rx.recv() => {
                if !matches!(*state.read().await, SessionState::Active) { continue; }
                let wire = cas_wire::frame::encode_frame(frame.header, &frame.body);
                if stream.write_all(&wire).await.is_err() { return SessionExit::Disconnected; }
            }
        }
    }
}

async fn futures_pending() {
    std::future::pending::<()>().await
}

#[allow(clippy::too_many_arguments)]
async fn handle_frame(
    config: &Arc<Config>,
    stream: &mut TcpStream,
    state: &Arc<RwLock<SessionState>>,
    header: FrameHeader,
    body: Vec<u8>,
    inbound_tx: &mpsc::Sender<Inbound>,
    t_resp_deadline: &mut Option<tokio::time::Instant>,
    t_pong_deadline: &mut Option<tokio::time::Instant>,
    currently_active: bool,
) -> Result<bool, ()> {
    let msg_id = MessageId::try_from(header.message_id);

    match msg_id {
        Ok(MessageId::EtsResSysCon) => {
            if currently_active {
                info!("RES_SYS_CON received while ACTIVE, ignoring");
                return Ok(true);
            }
            let env = parse_envelope(&body).map_err(|e| {
                error!(error = %e, "failed to parse RES_SYS_CON body");
            })?;
            match env.result_code.as_deref() {
                Some("401") => {
                    let (Some(realm), Some(nonce)) = (env.realm.clone(), env.nonce.clone()) else {
                        error!("401 challenge missing realm/nonce");
                        return Ok(false);
                    };
                    let response = cas_wire::auth::challenge_response(
                        &config.cas_dest_id,
                        &realm,
                        &config.cas_password,
                        &nonce,
                    );
                    let reply = Envelope {
                        dest_id: Some(config.cas_dest_id.clone()),
                        realm: Some(realm),
                        nonce: Some(nonce),
                        response: Some(response),
                        ..Default::default()
                    };
                    write_frame(stream, config.cas_magic_number, MessageId::EtsReqSysCon, &reply).await.map_err(|_| ())?;
                    *state.write().await = SessionState::AwaitingAuthResult;
                    *t_resp_deadline = Some(tokio::time::Instant::now() + config.t_resp);
                    Ok(true)
                }
                Some("200") => {
                    info!("CAS authentication succeeded, session ACTIVE");
                    *state.write().await = SessionState::Active;
                    *t_resp_deadline = None;
                    Ok(true)
                }
                other => {
                    warn!(result_code = ?other, "CAS authentication rejected");
                    Ok(false)
                }
            }
        }
        Ok(MessageId::EtsResSysSts) => {
            *t_pong_deadline = None;
            Ok(true)
        }
        Ok(MessageId::EtsNfyDisInfo) => {
            match parse_envelope(&body) {
                Ok(env) => {
                    let _ = inbound_tx.try_send(Inbound::DisasterNotify { header, envelope: env });
                }
                Err(e) => {
                    warn!(error = %e, "failed to parse ETS_NFY_DIS_INFO body, replying NACK, session stays up");
                    let err = DisasterIngestError::Parsing(e.to_string());
                    let reply = inbound::build_parse_failure_nack(config, &err);
                    if write_frame(stream, config.cas_magic_number, MessageId::EtsCnfDisInfo, &reply).await.is_err() {
                        return Err(());
                    }
                }
            }
            Ok(true)
        }
        Ok(MessageId::EtsCnfDeviceInfo) | Ok(MessageId::EtsCnfDeviceSts) | Ok(MessageId::EtsResDisReport) => {
            match parse_envelope(&body) {
                Ok(env) => {
                    let _ = inbound_tx.try_send(Inbound::ReportAck { header, envelope: env });
                }
                Err(e) => warn!(error = %e, "failed to parse report-ack body, ignoring, session stays up"),
            }
            Ok(true)
        }
        Ok(other) => {
            info!(message_id = %other, "unhandled message id, ignoring");
            Ok(true)
        }
        Err(raw) => {
            info!(raw_message_id = raw, "unknown message id, ignoring");
            Ok(true)
        }
    }
}

async fn write_frame(
    stream: &mut TcpStream,
    magic_number: u32,
    id: MessageId,
    env: &Envelope,
) -> std::io::Result<()> {
    let body = build_envelope(env);
    let header = FrameHeader {
        message_id: id.as_u32(),
        data_format: cas_wire::message_id::DATA_FORMAT_XML,
        magic_number,
        data_length: body.len() as u32,
    };
    let wire = cas_wire::frame::encode_frame(header, body.as_bytes());
    stream.write_all(&wire).await
}
