use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
    Router,
};

use super::{handlers, websocket::handle_websocket};
use crate::AppState;

const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

pub fn create_router(state: AppState) -> Router<AppState> {
    // Conversation routes
    let conversation_routes = Router::new()
        .route(
            "/conversations",
            post(handlers::conversations::create_or_get_conversation),
        )
        .route(
            "/conversations/:id",
            get(handlers::conversations::get_conversation),
        )
        .route(
            "/conversations/:id/status",
            put(handlers::conversations::update_status),
        )
        .route(
            "/conversations/:id/assignee",
            put(handlers::conversations::assign),
        )
        .route(
            "/conversations/:id/messages",
            get(handlers::conversations::get_messages).post(handlers::conversations::send_message),
        )
        .route(
            "/conversations/:id/read",
            post(handlers::conversations::mark_read),
        )
        .route(
            "/conversations/:id/delivered",
            post(handlers::conversations::mark_delivered),
        )
        .route(
            "/conversations/:id/typing",
            get(handlers::conversations::get_typing)
                .post(handlers::conversations::start_typing)
                .delete(handlers::conversations::stop_typing),
        )
        .route(
            "/stores/:store_id/conversations",
            get(handlers::conversations::get_store_conversations),
        )
        .route(
            "/customers/:customer_id/conversations",
            get(handlers::conversations::get_customer_conversations),
        );

    // Message routes
    let message_routes = Router::new()
        .route(
            "/messages/:id",
            get(handlers::messages::get_message)
                .put(handlers::messages::edit_message)
                .delete(handlers::messages::delete_message),
        )
        .route("/messages/:id/status", put(handlers::messages::update_status))
        .route(
            "/messages/:id/reactions",
            get(handlers::messages::get_reactions).post(handlers::messages::add_reaction),
        )
        .route(
            "/messages/:id/reactions/:user_id",
            delete(handlers::messages::remove_reaction),
        );

    // Presence routes
    let presence_routes = Router::new()
        .route(
            "/presence/:user_id/heartbeat",
            post(handlers::presence::heartbeat),
        )
        .route("/presence/:user_id", get(handlers::presence::get_status));

    // Attachment upload
    let attachment_routes = Router::new()
        .route(
            "/attachments",
            post(handlers::attachments::upload_attachment),
        )
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES));

    // WebSocket route
    let ws_route = Router::new().route("/ws", get(handle_websocket));

    // Combine all routes
    Router::new()
        .merge(conversation_routes)
        .merge(message_routes)
        .merge(presence_routes)
        .merge(attachment_routes)
        .merge(ws_route)
        .with_state(state)
}
