use web_push::{
    ContentEncoding, IsahcWebPushClient, SubscriptionInfo, VapidSignatureBuilder, WebPushClient,
    WebPushMessageBuilder,
};

use crate::config::AppConfig;
use crate::db;
use crate::db::models::MessageRow;
use crate::types::UserId;

/// Longest message excerpt shown in a notification.
const PREVIEW_CHARS: usize = 80;

fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}

/// Sends one payload to every subscription of a user. Subscriptions the
/// push service reports as gone are removed.
async fn send_push_to_user(
    pool: &db::Db,
    vapid_private: &str,
    client: &IsahcWebPushClient,
    user_id: &UserId,
    payload: &str,
) {
    let subscriptions = match db::push::get_subscriptions_for_user(pool, user_id).await {
        Ok(subs) => subs,
        Err(e) => {
            tracing::warn!("failed to get subscriptions for {user_id}: {e}");
            return;
        }
    };

    for sub in &subscriptions {
        let subscription = SubscriptionInfo::new(&sub.endpoint, &sub.p256dh, &sub.auth);

        let partial = match VapidSignatureBuilder::from_base64_no_sub(vapid_private) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("vapid key error: {e}");
                continue;
            }
        };
        let sig = match partial.add_sub_info(&subscription).build() {
            Ok(sig) => sig,
            Err(e) => {
                tracing::warn!("vapid build error: {e}");
                continue;
            }
        };

        let mut msg_builder = WebPushMessageBuilder::new(&subscription);
        msg_builder.set_vapid_signature(sig);
        msg_builder.set_payload(ContentEncoding::Aes128Gcm, payload.as_bytes());

        let message = match msg_builder.build() {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("push message build error: {e}");
                continue;
            }
        };

        if let Err(e) = client.send(message).await {
            let err_str = e.to_string();
            if err_str.contains("410") || err_str.contains("404") {
                tracing::info!("removing expired subscription for {user_id}");
                if let Err(e) =
                    db::push::delete_subscription_by_endpoint(pool, &sub.endpoint).await
                {
                    tracing::warn!("failed to remove subscription: {e}");
                }
            } else {
                tracing::warn!("push send error for {user_id}: {e}");
            }
        }
    }
}

/// Sends a JSON payload to the given users. A missing VAPID key disables
/// push without error.
pub async fn send_event_to_users(
    pool: &db::Db,
    config: &AppConfig,
    user_ids: &[UserId],
    payload: &serde_json::Value,
) -> Result<(), String> {
    let Some(vapid_private) = config.vapid_private_key.as_ref() else {
        return Ok(());
    };

    let client = IsahcWebPushClient::new().map_err(|e| e.to_string())?;

    for user_id in user_ids {
        let mut user_payload = payload.clone();
        if let Some(obj) = user_payload.as_object_mut() {
            obj.insert(
                "recipient_id".into(),
                serde_json::Value::String(user_id.to_string()),
            );
        }
        send_push_to_user(
            pool,
            vapid_private,
            &client,
            user_id,
            &user_payload.to_string(),
        )
        .await;
    }

    Ok(())
}

/// Notifies the other chat participant about a new message.
pub async fn send_message_notification(
    pool: &db::Db,
    config: &AppConfig,
    recipient: &UserId,
    message: &MessageRow,
) -> Result<(), String> {
    let sender_name = match message.sender_id.as_deref() {
        Some(sender) => db::users::get_user(pool, &UserId(sender.to_string()))
            .await
            .map_err(|e| e.to_string())?
            .map(|u| u.name)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| sender.to_string()),
        None => "StudyBuddy".to_string(),
    };
    let payload = serde_json::json!({
        "type": "message",
        "chat_id": message.chat_id,
        "message_id": message.id,
        "sender_id": message.sender_id,
        "sender_name": sender_name,
        "preview": preview(&message.text),
    });
    send_event_to_users(pool, config, std::slice::from_ref(recipient), &payload).await
}
