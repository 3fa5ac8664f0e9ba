//! Read and write pumps: the two tasks that move frames between a transport
//! and a [`Connection`].

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use log::{debug, error, info, warn};
use roomcast_protocol::{DecodeError, InboundFrame, OutboundEvent};
use tokio::time::{Instant, interval_at, timeout};

use super::{Connection, Frame, OutboundReceiver, Payload};
use crate::config::HubConfig;
use crate::error::{EnqueueError, ExitReason};
use crate::hub::Hub;
use crate::router::MessageRouter;

/// Upper bound on payloads coalesced into one flush.
const MAX_BATCH: usize = 64;

/// Register `conn`, run both pumps until the connection ends, and return
/// why the read side stopped.
pub async fn serve<K, S, E>(
    hub: Hub,
    router: Arc<dyn MessageRouter>,
    conn: Arc<Connection>,
    outbound: OutboundReceiver,
    sink: K,
    stream: S,
) -> ExitReason
where
    K: Sink<Frame> + Unpin + Send + 'static,
    K::Error: Display + Send,
    S: Stream<Item = Result<Frame, E>> + Unpin,
    E: Display,
{
    hub.register(Arc::clone(&conn)).await;

    let writer_conn = Arc::clone(&conn);
    let config = hub.config().clone();
    let writer =
        tokio::spawn(async move { write_pump(writer_conn, sink, outbound, &config).await });

    let reason = read_pump(Arc::clone(&conn), stream, &hub, &router).await;

    match writer.await {
        Ok(write_reason) => debug!("Write pump for {} ended: {}", conn.id(), write_reason),
        Err(e) => error!("Write pump for {} panicked: {}", conn.id(), e),
    }
    reason
}

// ============================================================================
// Read pump
// ============================================================================

/// Consume inbound frames until the peer goes away, the liveness deadline
/// passes, or the connection is cancelled.
///
/// On exit, whatever the cause, the connection is cancelled, unregistered
/// and reported to the router's `on_disconnect`.
pub async fn read_pump<S, E>(
    conn: Arc<Connection>,
    mut stream: S,
    hub: &Hub,
    router: &Arc<dyn MessageRouter>,
) -> ExitReason
where
    S: Stream<Item = Result<Frame, E>> + Unpin,
    E: Display,
{
    let config = hub.config();
    let pong_timeout = config.pong_timeout();
    let router_timeout = config.router_timeout();
    let max_frame = config.max_frame_bytes;

    let reason = loop {
        let next = tokio::select! {
            biased;
            _ = conn.cancelled() => break ExitReason::Cancelled,
            next = timeout(pong_timeout, stream.next()) => next,
        };

        let frame = match next {
            Err(_) => break ExitReason::DeadlineExpired,
            Ok(None) => break ExitReason::PeerClosed,
            Ok(Some(Err(e))) => break ExitReason::Transport(e.to_string()),
            Ok(Some(Ok(frame))) => frame,
        };

        conn.touch();
        conn.mark_active();

        if frame.len() > max_frame {
            break ExitReason::FrameTooLarge {
                size: frame.len(),
                limit: max_frame,
            };
        }

        let text = match frame {
            Frame::Text(text) => text,
            Frame::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    debug!("Non-UTF-8 binary frame from {}", conn.id());
                    match reply_error(&conn, "Invalid message format") {
                        Ok(()) => continue,
                        Err(reason) => break reason,
                    }
                }
            },
            // Transport pings are answered by the websocket layer.
            Frame::Ping(_) | Frame::Pong(_) => continue,
            Frame::Close => break ExitReason::PeerClosed,
        };

        if let Err(reason) = dispatch(&conn, &text, router, router_timeout).await {
            break reason;
        }
    };

    if reason.is_clean() {
        info!(
            "Read pump for {} ({}) stopped: {}",
            conn.id(),
            conn.identity(),
            reason
        );
    } else {
        warn!(
            "Read pump for {} ({}) stopped: {}",
            conn.id(),
            conn.identity(),
            reason
        );
    }

    conn.begin_unregister();
    conn.cancel();
    hub.unregister(Arc::clone(&conn)).await;
    if timeout(router_timeout, router.on_disconnect(&conn))
        .await
        .is_err()
    {
        warn!("Router disconnect hook for {} timed out", conn.id());
    }

    reason
}

/// Decode one text payload and hand it to the router.
///
/// Only failures that end the connection are returned; everything else is
/// answered with an error event to this connection.
async fn dispatch(
    conn: &Arc<Connection>,
    text: &str,
    router: &Arc<dyn MessageRouter>,
    router_timeout: Duration,
) -> Result<(), ExitReason> {
    let frame = match InboundFrame::decode(text) {
        Ok(frame) => frame,
        Err(e @ DecodeError::UnknownType(_)) => {
            debug!("Rejected frame from {}: {}", conn.id(), e);
            return reply_error(conn, format!("Error processing message: {e}"));
        }
        Err(e) => {
            debug!("Rejected frame from {}: {}", conn.id(), e);
            return reply_error(conn, "Invalid message format");
        }
    };

    let outcome = match frame {
        InboundFrame::Ping { .. } => {
            return reply(conn, &OutboundEvent::pong(conn.room().cloned()));
        }
        InboundFrame::Message(message) => {
            timeout(router_timeout, router.on_message(conn, message)).await
        }
        InboundFrame::Typing { .. } => timeout(router_timeout, router.on_typing(conn)).await,
    };

    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            warn!("Router rejected frame from {}: {:#}", conn.id(), e);
            reply_error(conn, format!("Error processing message: {e}"))
        }
        Err(_) => {
            warn!(
                "Router did not finish within {:?} for {}",
                router_timeout,
                conn.id()
            );
            reply_error(conn, "Message processing timed out")
        }
    }
}

fn reply_error(conn: &Connection, message: impl Into<String>) -> Result<(), ExitReason> {
    reply(conn, &OutboundEvent::error(conn.room().cloned(), message))
}

/// Queue an event for this connection only.
fn reply(conn: &Connection, event: &OutboundEvent) -> Result<(), ExitReason> {
    match conn.send_event(event) {
        Ok(()) | Err(EnqueueError::Encode) => Ok(()),
        Err(EnqueueError::Full) => Err(ExitReason::SlowConsumer),
        Err(EnqueueError::Closed) => Err(ExitReason::QueueClosed),
    }
}

// ============================================================================
// Write pump
// ============================================================================

/// Drain the outbound queue onto `sink`, probing the peer every
/// `probe_interval`.
///
/// Cancels the connection on exit so the read pump stops too.
pub async fn write_pump<K>(
    conn: Arc<Connection>,
    mut sink: K,
    mut outbound: OutboundReceiver,
    config: &HubConfig,
) -> ExitReason
where
    K: Sink<Frame> + Unpin,
    K::Error: Display,
{
    let probe = config.probe_interval();
    let write_timeout = config.write_timeout();
    let mut ticker = interval_at(Instant::now() + probe, probe);

    let reason = loop {
        tokio::select! {
            biased;
            _ = conn.cancelled() => break ExitReason::Cancelled,
            payload = outbound.recv() => match payload {
                Some(first) => {
                    if let Err(reason) =
                        write_batch(&mut sink, &mut outbound, first, write_timeout).await
                    {
                        break reason;
                    }
                }
                None => {
                    // Queue closed and drained.
                    let _ = timeout(write_timeout, sink.send(Frame::Close)).await;
                    break ExitReason::QueueClosed;
                }
            },
            _ = ticker.tick() => {
                conn.mark_idle_if_quiet(probe);
                if let Err(reason) = write_frame(&mut sink, Frame::Ping(Vec::new()), write_timeout).await {
                    break reason;
                }
            }
        }
    };

    if reason.is_clean() {
        debug!("Write pump for {} stopped: {}", conn.id(), reason);
    } else {
        warn!("Write pump for {} stopped: {}", conn.id(), reason);
    }
    conn.cancel();
    reason
}

/// Write `first` plus whatever else is already queued, then flush once.
async fn write_batch<K>(
    sink: &mut K,
    outbound: &mut OutboundReceiver,
    first: Payload,
    write_timeout: Duration,
) -> Result<(), ExitReason>
where
    K: Sink<Frame> + Unpin,
    K::Error: Display,
{
    let batch = async {
        sink.feed(Frame::Text(first.to_string())).await?;
        for _ in 1..MAX_BATCH {
            let Ok(payload) = outbound.try_recv() else {
                break;
            };
            sink.feed(Frame::Text(payload.to_string())).await?;
        }
        sink.flush().await
    };

    match timeout(write_timeout, batch).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ExitReason::Transport(e.to_string())),
        Err(_) => Err(ExitReason::WriteTimeout),
    }
}

async fn write_frame<K>(sink: &mut K, frame: Frame, write_timeout: Duration) -> Result<(), ExitReason>
where
    K: Sink<Frame> + Unpin,
    K::Error: Display,
{
    match timeout(write_timeout, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ExitReason::Transport(e.to_string())),
        Err(_) => Err(ExitReason::WriteTimeout),
    }
}
