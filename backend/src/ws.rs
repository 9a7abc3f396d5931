//! WebSocket submission endpoint.
//!
//! The client upgrades, sends one order-request frame, and then receives
//! lifecycle events until the order reaches a terminal status or the client
//! disconnects. Invalid submissions are answered with an error frame and an
//! immediate close, before any side effect.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt, stream::SplitSink};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use common::time::now_ms;
use corelib::error::{EngineError, ErrorKind};
use corelib::job::Job;
use corelib::order::{NewOrder, OrderStatus};
use corelib::validate::validate_request;
use corelib::wire::{ErrorFrame, OrderRequest, StatusUpdate};

use crate::app::App;

pub async fn submit_handler(ws: WebSocketUpgrade, State(app): State<Arc<App>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app))
}

async fn handle_socket(socket: WebSocket, app: Arc<App>) {
    let (mut sender, mut receiver) = socket.split();

    // First text frame is the submission.
    let raw = loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => break text,
            Some(Ok(Message::Close(_))) | None => return,
            Some(Ok(_)) => continue,
            Some(Err(_)) => return,
        }
    };

    let request: OrderRequest = match serde_json::from_str(&raw) {
        Ok(r) => r,
        Err(e) => {
            debug!(error = %e, "malformed submission frame");
            reject(&mut sender, "invalid request body").await;
            return;
        }
    };

    if let Err(err) = validate_request(&request, app.config.max_slippage) {
        reject(&mut sender, &err.message).await;
        return;
    }

    // Re-validate after defaulting: the bound applies to the configured
    // default exactly as it does to caller input, still before any side
    // effect.
    let slippage = request.slippage.unwrap_or(app.config.default_slippage);
    if !slippage.is_finite() || slippage < 0.0 || slippage > app.config.max_slippage {
        reject(
            &mut sender,
            &format!("slippage must be between 0 and {}", app.config.max_slippage),
        )
        .await;
        return;
    }

    let order = match app
        .store
        .create(NewOrder {
            token_in: request.token_in.clone(),
            token_out: request.token_out.clone(),
            amount_in: request.amount as u64,
            slippage,
        })
        .await
    {
        Ok(order) => order,
        Err(err) => {
            error!(error = %err, "order creation failed");
            send_error_frame(&mut sender, &err).await;
            return;
        }
    };

    info!(
        order_id = %order.id,
        token_in = %order.token_in,
        token_out = %order.token_out,
        amount_in = order.amount_in,
        slippage,
        "order accepted"
    );

    // Subscribe before anything can transition so no event is missed.
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let subscriber_id = app.hub.attach(order.id, tx);

    // First frame confirms acceptance in `pending`.
    let first = StatusUpdate {
        order_id: order.id,
        status: OrderStatus::Pending,
        timestamp: now_ms(),
        data: None,
    };
    if let Ok(frame) = serde_json::to_string(&first) {
        if sender.send(Message::Text(frame.into())).await.is_err() {
            app.hub.detach(&order.id, subscriber_id);
            return;
        }
    }

    app.cache.set(order.clone());

    if let Err(err) = app.queue.enqueue(Job::from_order(&order)).await {
        error!(order_id = %order.id, error = %err, "enqueue failed");
        app.critical.publish(err.clone());
        send_error_frame(&mut sender, &err).await;
        app.hub.detach(&order.id, subscriber_id);
        return;
    }

    // Fan the pending event to every subscriber (idempotent with the frame
    // above for this one).
    app.hub.emit(&order.id, OrderStatus::Pending, None);

    // Forward hub frames; stop when the hub releases us (terminal status)
    // or the client goes away.
    let mut forward = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    let mut drain = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut forward => drain.abort(),
        _ = &mut drain => forward.abort(),
    }

    // Idempotent when the worker already detached everyone.
    app.hub.detach(&order.id, subscriber_id);
    debug!(order_id = %order.id, "submission stream closed");
}

async fn reject(sender: &mut SplitSink<WebSocket, Message>, message: &str) {
    let frame = ErrorFrame::validation(message, now_ms());
    if let Ok(text) = serde_json::to_string(&frame) {
        let _ = sender.send(Message::Text(text.into())).await;
    }
    let _ = sender.close().await;
}

async fn send_error_frame(sender: &mut SplitSink<WebSocket, Message>, err: &EngineError) {
    let code = match err.kind {
        ErrorKind::Validation => "VALIDATION_ERROR",
        _ => "SYSTEM_ERROR",
    };
    let frame = ErrorFrame {
        error: corelib::wire::ErrorBody {
            code: code.into(),
            message: err.message.clone(),
        },
        timestamp_ms: now_ms(),
    };
    if let Ok(text) = serde_json::to_string(&frame) {
        let _ = sender.send(Message::Text(text.into())).await;
    }
    let _ = sender.close().await;
}
