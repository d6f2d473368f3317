//! Write pump: queued values, keepalive pings and the disconnect close frame out.
use std::sync::Arc;

use futures::{Sink, SinkExt};
use log::Level;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::{
    channel::Inbound,
    codec::Codec,
    frame::FrameView,
    options::Config,
    session::lifecycle::{CloseReason, Lifecycle},
    Result, WebSocketError,
};

pub(crate) struct WritePump<K, C: Codec> {
    pub sink: K,
    pub codec: Arc<C>,
    pub outbound: Inbound<C::Item>,
    pub lifecycle: Arc<Lifecycle>,
    pub config: Arc<Config>,
}

/// What the write pump hands back to the coordinator.
pub(crate) struct Written<K> {
    pub sink: K,
    /// A close frame went out on the disconnect path.
    pub close_sent: bool,
}

impl<K, C> WritePump<K, C>
where
    K: Sink<FrameView, Error = WebSocketError> + Unpin,
    C: Codec,
{
    /// Services one event per iteration until `done` fires, a write fails, or a disconnect
    /// request was answered with a close frame. Fires `done` on the way out.
    pub async fn run(mut self) -> Written<K> {
        let done = self.lifecycle.done();
        let lifecycle = self.lifecycle.clone();

        let period = self.config.ping_period;
        let mut ping = time::interval_at(Instant::now() + period, period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut queue_open = true;
        let mut close_sent = false;

        loop {
            tokio::select! {
                biased;
                _ = done.wait() => break,
                code = lifecycle.disconnect_requested() => {
                    log_at!(self.config, Level::Debug, "closing with code {code}");
                    match self.write(FrameView::close(code, "")).await {
                        Ok(()) => close_sent = true,
                        Err(err) => log_at!(self.config, Level::Warn, "close frame failed: {err}"),
                    }
                    break;
                }
                _ = ping.tick() => {
                    if let Err(err) = self.write(FrameView::ping(bytes::Bytes::new())).await {
                        log_at!(self.config, Level::Warn, "ping failed: {err}");
                        self.lifecycle.trigger(CloseReason::WriteFailed);
                        break;
                    }
                }
                value = self.outbound.recv(), if queue_open => {
                    let Some(value) = value else {
                        log_at!(self.config, Level::Debug, "outbound queue closed");
                        queue_open = false;
                        continue;
                    };

                    let frame = match self.codec.encode(value) {
                        Ok(frame) => frame,
                        Err(err) => {
                            log_at!(self.config, Level::Warn, "dropping outbound message: {err}");
                            continue;
                        }
                    };

                    if let Err(err) = self.write(frame).await {
                        log_at!(self.config, Level::Warn, "write failed: {err}");
                        self.lifecycle.trigger(CloseReason::WriteFailed);
                        break;
                    }
                }
            }
        }

        self.lifecycle.finish();

        Written {
            sink: self.sink,
            close_sent,
        }
    }

    async fn write(&mut self, frame: FrameView) -> Result<()> {
        match time::timeout(self.config.write_wait, self.sink.send(frame)).await {
            Ok(res) => res,
            Err(_) => Err(WebSocketError::WriteTimeout),
        }
    }
}
