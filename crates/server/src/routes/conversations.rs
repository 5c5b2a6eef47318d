use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::{
    db::models::{Conversation, FileAttachment, Message, MessageView},
    error::{AppError, Result},
    middleware::auth::AuthUser,
    routes::tasks::fetch_task,
    services::{
        hub::HubEvent,
        notify::{notify, NotificationKind},
    },
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_conversations).post(open_conversation))
        .route("/:id/messages", get(list_messages).post(send_message))
}

#[derive(Debug, Deserialize)]
pub struct OpenConversationRequest {
    pub task_id: String,
    /// Required when the task's client opens the conversation.
    pub freelancer_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AttachmentInput {
    pub file_name: String,
    pub url: String,
    #[serde(default)]
    pub size_bytes: i64,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentInput>,
}

#[derive(Debug, Serialize, FromRow)]
pub struct ConversationView {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub conversation: Conversation,
    pub task_title: String,
    pub client_name: String,
    pub freelancer_name: String,
    pub last_message_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ConversationListResponse {
    pub conversations: Vec<ConversationView>,
}

#[derive(Debug, Serialize)]
pub struct MessageListResponse {
    pub messages: Vec<MessageView>,
}

/// Returns the conversation for the triple, creating it on first use.
pub(crate) async fn get_or_create_conversation(
    conn: &mut SqliteConnection,
    task_id: &str,
    client_id: &str,
    freelancer_id: &str,
) -> Result<Conversation> {
    sqlx::query(
        r#"
        INSERT INTO conversations (id, task_id, client_id, freelancer_id, created_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT (task_id, client_id, freelancer_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(task_id)
    .bind(client_id)
    .bind(freelancer_id)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    let conversation = sqlx::query_as::<_, Conversation>(
        "SELECT * FROM conversations WHERE task_id = ? AND client_id = ? AND freelancer_id = ?",
    )
    .bind(task_id)
    .bind(client_id)
    .bind(freelancer_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(conversation)
}

/// Loads a conversation the user takes part in. Outsiders get a 404.
pub(crate) async fn fetch_conversation_for(
    pool: &SqlitePool,
    id: &str,
    user_id: &str,
) -> Result<Conversation> {
    sqlx::query_as::<_, Conversation>("SELECT * FROM conversations WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .filter(|c| c.has_participant(user_id))
        .ok_or_else(|| AppError::NotFound("Conversation not found".to_string()))
}

async fn list_conversations(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ConversationListResponse>> {
    let conversations = sqlx::query_as::<_, ConversationView>(
        r#"
        SELECT c.id, c.task_id, c.client_id, c.freelancer_id, c.created_at,
               t.title AS task_title, cu.name AS client_name, fu.name AS freelancer_name,
               (SELECT MAX(m.created_at) FROM messages m WHERE m.conversation_id = c.id) AS last_message_at
        FROM conversations c
        JOIN tasks t ON c.task_id = t.id
        JOIN users cu ON c.client_id = cu.id
        JOIN users fu ON c.freelancer_id = fu.id
        WHERE c.client_id = ? OR c.freelancer_id = ?
        ORDER BY COALESCE(last_message_at, c.created_at) DESC
        "#,
    )
    .bind(&user.id)
    .bind(&user.id)
    .fetch_all(&state.db.pool)
    .await?;

    Ok(Json(ConversationListResponse { conversations }))
}

pub(crate) async fn open_conversation(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<OpenConversationRequest>,
) -> Result<Json<Conversation>> {
    let task = fetch_task(&state.db.pool, &body.task_id).await?;

    let freelancer_id = if task.client_id == user.id {
        body.freelancer_id.ok_or_else(|| {
            AppError::Validation("Choose the freelancer to talk to".to_string())
        })?
    } else {
        user.id.clone()
    };

    // Conversations exist only between a client and someone who applied.
    let applied = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM applications WHERE task_id = ? AND freelancer_id = ?",
    )
    .bind(&task.id)
    .bind(&freelancer_id)
    .fetch_one(&state.db.pool)
    .await?;

    if applied == 0 {
        return Err(AppError::Forbidden(
            "Conversations are only available to applicants of this task".to_string(),
        ));
    }

    let mut conn = state.db.pool.acquire().await?;
    let conversation =
        get_or_create_conversation(&mut conn, &task.id, &task.client_id, &freelancer_id).await?;

    Ok(Json(conversation))
}

async fn load_message_views(pool: &SqlitePool, conversation_id: &str) -> Result<Vec<MessageView>> {
    let messages = sqlx::query_as::<_, Message>(
        "SELECT * FROM messages WHERE conversation_id = ? ORDER BY created_at ASC, rowid ASC",
    )
    .bind(conversation_id)
    .fetch_all(pool)
    .await?;

    let attachments = sqlx::query_as::<_, FileAttachment>(
        r#"
        SELECT fa.id, fa.message_id, fa.file_name, fa.url, fa.size_bytes
        FROM file_attachments fa
        JOIN messages m ON fa.message_id = m.id
        WHERE m.conversation_id = ?
        ORDER BY fa.rowid ASC
        "#,
    )
    .bind(conversation_id)
    .fetch_all(pool)
    .await?;

    let mut by_message: HashMap<String, Vec<FileAttachment>> = HashMap::new();
    for attachment in attachments {
        by_message
            .entry(attachment.message_id.clone())
            .or_default()
            .push(attachment);
    }

    Ok(messages
        .into_iter()
        .map(|message| MessageView {
            attachments: by_message.remove(&message.id).unwrap_or_default(),
            message,
        })
        .collect())
}

pub(crate) async fn list_messages(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<MessageListResponse>> {
    let conversation = fetch_conversation_for(&state.db.pool, &id, &user.id).await?;
    let messages = load_message_views(&state.db.pool, &conversation.id).await?;
    Ok(Json(MessageListResponse { messages }))
}

pub(crate) async fn send_message(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> Result<Json<MessageView>> {
    let conversation = fetch_conversation_for(&state.db.pool, &id, &user.id).await?;

    let content = body.content.trim().to_string();
    if content.is_empty() && body.attachments.is_empty() {
        return Err(AppError::Validation(
            "A message needs text or an attachment".to_string(),
        ));
    }
    for attachment in &body.attachments {
        if attachment.file_name.trim().is_empty() || !state.storage.owns_url(&attachment.url) {
            return Err(AppError::Validation(format!(
                "Attachment {} must be uploaded first",
                attachment.file_name
            )));
        }
    }

    let message = Message {
        id: Uuid::new_v4().to_string(),
        conversation_id: conversation.id.clone(),
        sender_id: user.id.clone(),
        content,
        created_at: Utc::now(),
    };
    let attachments: Vec<FileAttachment> = body
        .attachments
        .into_iter()
        .map(|a| FileAttachment {
            id: Uuid::new_v4().to_string(),
            message_id: message.id.clone(),
            file_name: a.file_name.trim().to_string(),
            url: a.url,
            size_bytes: a.size_bytes.max(0),
        })
        .collect();

    let mut tx = state.db.pool.begin().await?;

    sqlx::query(
        "INSERT INTO messages (id, conversation_id, sender_id, content, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&message.id)
    .bind(&message.conversation_id)
    .bind(&message.sender_id)
    .bind(&message.content)
    .bind(message.created_at)
    .execute(&mut *tx)
    .await?;

    for attachment in &attachments {
        sqlx::query(
            "INSERT INTO file_attachments (id, message_id, file_name, url, size_bytes) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&attachment.id)
        .bind(&attachment.message_id)
        .bind(&attachment.file_name)
        .bind(&attachment.url)
        .bind(attachment.size_bytes)
        .execute(&mut *tx)
        .await?;
    }

    notify(
        &mut *tx,
        conversation.other_participant(&user.id),
        NotificationKind::NewMessage,
        &format!("New message from {}", user.name),
        Some(&conversation.task_id),
    )
    .await?;

    tx.commit().await?;

    let view = MessageView {
        message,
        attachments,
    };

    // Subscribers only ever see committed messages.
    let delivered = state
        .hub
        .publish(
            &conversation.id,
            HubEvent::MessageCreated {
                message: view.clone(),
            },
        )
        .await;
    tracing::debug!(conversation_id = %conversation.id, delivered, "message published");

    Ok(Json(view))
}
