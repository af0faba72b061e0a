//! Adapts a session's event stream to a server-sent-events HTTP response:
//! replay everything after the client's cursor, then tail live events,
//! injecting an explicit `keepalive` event when the session has been quiet.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event as SseFrame, KeepAlive, Sse};
use futures::stream::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::broadcaster::{CloseReason, Subscriber};
use crate::event::{Event, EventKind};

/// Builds the SSE response for one subscriber: everything in `replay` is
/// sent first, then the subscriber's live queue is tailed until it closes
/// (either `Terminal` or `DroppedForSlowness`, see `broadcaster::CloseReason`).
pub fn stream(
    replay: Vec<Event>,
    mut subscriber: Subscriber,
    keepalive_interval: Duration,
) -> Sse<impl Stream<Item = Result<SseFrame, Infallible>>> {
    let (tx, rx) = mpsc::channel::<Event>(32);

    tokio::spawn(async move {
        let mut last_seq = 0;
        for event in replay {
            last_seq = event.seq;
            if tx.send(event).await.is_err() {
                return;
            }
        }

        loop {
            tokio::select! {
                biased;
                event = subscriber.recv() => {
                    match event {
                        Some(event) => {
                            last_seq = event.seq;
                            if tx.send((*event).clone()).await.is_err() {
                                return;
                            }
                        }
                        None => {
                            if subscriber.close_reason() == CloseReason::DroppedForSlowness {
                                let _ = tx
                                    .send(Event::new(
                                        last_seq,
                                        now_millis(),
                                        EventKind::Error {
                                            message: "subscriber evicted due to slow consumer".to_string(),
                                            recoverable: false,
                                        },
                                    ))
                                    .await;
                            }
                            return;
                        }
                    }
                }
                () = tokio::time::sleep(keepalive_interval) => {
                    let _ = tx
                        .send(Event::new(last_seq, now_millis(), EventKind::Keepalive {}))
                        .await;
                }
            }
        }
    });

    let frames = ReceiverStream::new(rx).map(|event| Ok(event_to_frame(&event)));
    Sse::new(frames).keep_alive(KeepAlive::new().interval(keepalive_interval))
}

/// Streams a terminal session's full history with no live tail — used when
/// a session has already been retired from the live index and is only
/// reachable through the persistence adapter.
pub fn replay_only(
    replay: Vec<Event>,
    keepalive_interval: Duration,
) -> Sse<impl Stream<Item = Result<SseFrame, Infallible>>> {
    let frames = futures::stream::iter(replay.into_iter().map(|event| Ok(event_to_frame(&event))));
    Sse::new(frames).keep_alive(KeepAlive::new().interval(keepalive_interval))
}

fn event_to_frame(event: &Event) -> SseFrame {
    SseFrame::default()
        .event(event.kind.label())
        .data(serde_json::to_string(event).unwrap_or_default())
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
