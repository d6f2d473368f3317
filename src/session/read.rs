//! Read pump: frames in, decoded values out.
use std::sync::Arc;

use futures::{Stream, StreamExt};
use log::Level;
use tokio::{sync::mpsc, time::Instant};

use crate::{
    channel::{Done, Outbound},
    codec::{Codec, CodecError},
    frame::{FrameView, OpCode},
    options::Config,
    session::lifecycle::{CloseReason, Lifecycle},
    Result,
};

pub(crate) struct ReadPump<S, C: Codec> {
    pub stream: S,
    pub codec: Arc<C>,
    pub inbound: Outbound<C::Item>,
    pub errors: mpsc::Sender<CodecError>,
    pub lifecycle: Arc<Lifecycle>,
    pub config: Arc<Config>,
}

impl<S, C> ReadPump<S, C>
where
    S: Stream<Item = Result<FrameView>> + Unpin,
    C: Codec,
{
    /// Reads until the peer goes away, the stream fails, no pong arrives within the pong
    /// wait, or another trigger ends the connection. Hands the stream back for closing.
    pub async fn run(mut self) -> S {
        let done = self.lifecycle.done();
        let deadline = tokio::time::sleep(self.config.pong_wait);
        tokio::pin!(deadline);

        let reason = loop {
            let next = tokio::select! {
                biased;
                _ = done.wait() => break None,
                next = self.stream.next() => next,
                _ = &mut deadline => {
                    log_at!(self.config, Level::Warn, "no pong within {:?}", self.config.pong_wait);
                    break Some(CloseReason::ReadTimeout);
                }
            };

            let frame = match next {
                Some(Ok(frame)) => frame,
                Some(Err(err)) => {
                    log_at!(self.config, Level::Warn, "read failed: {err}");
                    break Some(CloseReason::ReadFailed);
                }
                None => break Some(CloseReason::PeerClosed),
            };

            match frame.opcode {
                OpCode::Close => {
                    log_at!(
                        self.config,
                        Level::Debug,
                        "peer closed the connection (code={:?})",
                        frame.close_code()
                    );
                    break Some(CloseReason::PeerClosed);
                }
                OpCode::Pong => deadline
                    .as_mut()
                    .reset(Instant::now() + self.config.pong_wait),
                OpCode::Ping => {}
                OpCode::Text | OpCode::Binary => match self.codec.decode(frame) {
                    Ok(value) => {
                        if !self.deliver(value, &done).await {
                            break None;
                        }
                    }
                    Err(err) => {
                        log_at!(self.config, Level::Warn, "dropping inbound message: {err}");
                        let _ = self.errors.try_send(err);
                    }
                },
            }
        };

        if let Some(reason) = reason {
            self.lifecycle.trigger(reason);
        }

        self.stream
    }

    /// Enqueues `value`, waiting while the inbound queue is full. Returns `false` if the
    /// connection ended meanwhile.
    async fn deliver(&self, value: C::Item, done: &Done) -> bool {
        tokio::select! {
            biased;
            _ = done.wait() => false,
            res = self.inbound.send(value) => {
                // a handler that does not receive has dropped its end
                let _ = res;
                true
            }
        }
    }
}
