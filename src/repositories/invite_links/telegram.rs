use anyhow::{anyhow, bail};
use async_trait::async_trait;
use serde::Deserialize;

use super::InviteLinkFetcher;
use crate::models::ChatId;

#[derive(Deserialize)]
struct BotApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Deserialize)]
struct Chat {
    invite_link: Option<String>,
}

/// Reads a chat's primary invite link through the Bot API `getChat` method.
pub struct BotApiFetcher {
    api_url: String,
    token: String,
    client: reqwest::Client,
}

impl BotApiFetcher {
    pub fn new(api_url: String, token: String) -> Self {
        Self {
            api_url,
            token,
            client: reqwest::Client::new(),
        }
    }

    // Request errors carry the URL, which embeds the bot token.
    fn redacted(&self, error: reqwest::Error) -> anyhow::Error {
        anyhow!(error.to_string().replace(&self.token, "$TOKEN"))
    }
}

#[async_trait]
impl InviteLinkFetcher for BotApiFetcher {
    async fn fetch_invite_link(&self, chat_id: ChatId) -> Result<String, anyhow::Error> {
        let response: BotApiResponse<Chat> = self
            .client
            .get(format!("{}/bot{}/getChat", self.api_url, self.token))
            .query(&[("chat_id", chat_id)])
            .send()
            .await
            .map_err(|e| self.redacted(e))?
            .json()
            .await
            .map_err(|e| self.redacted(e))?;

        if !response.ok {
            bail!(
                "Bot API: {}",
                response.description.unwrap_or_else(|| "getChat failed".to_string())
            );
        }

        match response.result {
            Some(Chat {
                invite_link: Some(link),
            }) => Ok(link),
            Some(_) => bail!("Chat {} has no invite link.", chat_id),
            None => bail!("Bot API: Bad response format."),
        }
    }
}
