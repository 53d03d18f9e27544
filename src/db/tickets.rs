//! Short-lived tickets (invitation links, OAuth hand-off).
//!
//! Tickets are opaque random tokens mapped to a JSON value under a key
//! prefix, with a TTL enforced by the backing store.

use crate::crypto;
use crate::error::AppResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::models::UserRole;

#[async_trait]
pub trait TicketStore: Send + Sync {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()>;
    async fn get(&self, key: &str) -> AppResult<Option<String>>;
    async fn delete(&self, key: &str) -> AppResult<()>;
    /// Reads and removes in one step.
    async fn take(&self, key: &str) -> AppResult<Option<String>>;
}

#[derive(Clone)]
pub struct RedisTicketStore {
    conn: redis::aio::MultiplexedConnection,
}

impl RedisTicketStore {
    pub async fn connect(url: &str) -> AppResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl TicketStore for RedisTicketStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn take(&self, key: &str) -> AppResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GETDEL")
            .arg(key)
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }
}

/// Process-local ticket store. Expired entries are dropped lazily on access.
#[derive(Default)]
pub struct MemoryTicketStore {
    entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl MemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TicketStore for MemoryTicketStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        entries.retain(|_, (_, expires)| *expires > now);
        entries.insert(key.to_string(), (value.to_string(), now + ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|(_, expires)| *expires > Instant::now())
            .map(|(value, _)| value.clone()))
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn take(&self, key: &str) -> AppResult<Option<String>> {
        let removed = self.entries.write().await.remove(key);
        Ok(removed
            .filter(|(_, expires)| *expires > Instant::now())
            .map(|(value, _)| value))
    }
}

/// Typed view over a [`TicketStore`] under one key prefix.
pub struct Tickets<T> {
    store: Arc<dyn TicketStore>,
    prefix: &'static str,
    _value: PhantomData<fn() -> T>,
}

impl<T> Clone for Tickets<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            prefix: self.prefix,
            _value: PhantomData,
        }
    }
}

impl<T: Serialize + DeserializeOwned> Tickets<T> {
    pub fn new(store: Arc<dyn TicketStore>, prefix: &'static str) -> Self {
        Self {
            store,
            prefix,
            _value: PhantomData,
        }
    }

    fn key(&self, token: &str) -> String {
        format!("{}:{}", self.prefix, token)
    }

    /// Stores `value` under a fresh token and returns the token.
    pub async fn issue(&self, value: &T, ttl: Duration) -> AppResult<String> {
        let token = crypto::generate_token();
        self.put(&token, value, ttl).await?;
        Ok(token)
    }

    /// Stores `value` under an existing token, e.g. to hand back a ticket
    /// that was taken but not used.
    pub async fn put(&self, token: &str, value: &T, ttl: Duration) -> AppResult<()> {
        let payload = serde_json::to_string(value)?;
        self.store.set(&self.key(token), &payload, ttl).await
    }

    pub async fn get(&self, token: &str) -> AppResult<Option<T>> {
        match self.store.get(&self.key(token)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn delete(&self, token: &str) -> AppResult<()> {
        self.store.delete(&self.key(token)).await
    }

    pub async fn take(&self, token: &str) -> AppResult<Option<T>> {
        match self.store.take(&self.key(token)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}

/// Issued by an admin; redeemed once at sign-up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvitationTicket {
    pub role: UserRole,
    pub expires_at: DateTime<Utc>,
}

impl InvitationTicket {
    pub fn new(role: UserRole, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());
        Self {
            role,
            expires_at: Utc::now() + ttl,
        }
    }

    /// Time left before the invitation lapses, if any.
    pub fn remaining(&self) -> Option<Duration> {
        (self.expires_at - Utc::now())
            .to_std()
            .ok()
            .filter(|left| !left.is_zero())
    }
}

/// Carries a freshly authenticated OAuth user to the front end.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OauthTicket {
    pub user_id: Uuid,
}

/// A Google sign-in started by some browser and not yet finished. Keyed by
/// the nonce carried in the OAuth `state`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OauthPending {
    pub started_at: DateTime<Utc>,
}

pub const INVITATION_PREFIX: &str = "invitation_tickets";
pub const OAUTH_PREFIX: &str = "oauth_tickets";
pub const OAUTH_STATE_PREFIX: &str = "oauth_states";

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Arc<dyn TicketStore> {
        Arc::new(MemoryTicketStore::new())
    }

    #[tokio::test]
    async fn issued_ticket_can_be_read_back() {
        let tickets: Tickets<OauthTicket> = Tickets::new(store(), OAUTH_PREFIX);
        let ticket = OauthTicket {
            user_id: Uuid::new_v4(),
        };
        let token = tickets.issue(&ticket, Duration::from_secs(60)).await.unwrap();
        assert_eq!(tickets.get(&token).await.unwrap(), Some(ticket));
    }

    #[tokio::test]
    async fn take_is_single_use() {
        let tickets: Tickets<InvitationTicket> = Tickets::new(store(), INVITATION_PREFIX);
        let token = tickets
            .issue(&InvitationTicket::new(UserRole::Employer, Duration::from_secs(60)), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(tickets.take(&token).await.unwrap().is_some());
        assert!(tickets.take(&token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_tickets_are_gone() {
        let tickets: Tickets<InvitationTicket> = Tickets::new(store(), INVITATION_PREFIX);
        let token = tickets
            .issue(&InvitationTicket::new(UserRole::Employer, Duration::from_secs(60)), Duration::from_millis(20))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(tickets.get(&token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_restores_a_taken_ticket() {
        let tickets: Tickets<InvitationTicket> = Tickets::new(store(), INVITATION_PREFIX);
        let invitation = InvitationTicket::new(UserRole::Admin, Duration::from_secs(60));
        let token = tickets.issue(&invitation, Duration::from_secs(60)).await.unwrap();

        let taken = tickets.take(&token).await.unwrap().unwrap();
        tickets
            .put(&token, &taken, taken.remaining().unwrap())
            .await
            .unwrap();
        assert_eq!(tickets.take(&token).await.unwrap(), Some(invitation));
    }

    #[test]
    fn lapsed_invitation_has_nothing_remaining() {
        let invitation = InvitationTicket::new(UserRole::Employer, Duration::ZERO);
        assert!(invitation.remaining().is_none());
        let fresh = InvitationTicket::new(UserRole::Employer, Duration::from_secs(60));
        assert!(fresh.remaining().is_some());
    }

    #[tokio::test]
    async fn prefixes_keep_ticket_kinds_apart() {
        let shared = store();
        let invitations: Tickets<InvitationTicket> = Tickets::new(shared.clone(), INVITATION_PREFIX);
        let oauth: Tickets<OauthTicket> = Tickets::new(shared, OAUTH_PREFIX);
        let token = invitations
            .issue(&InvitationTicket::new(UserRole::Employer, Duration::from_secs(60)), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(oauth.get(&token).await.unwrap().is_none());
    }
}
