//! START / PART / END reassembly on top of the [`SessionStore`].

use parley_chat::ChatError;
use parley_common::ConnectionId;
use tracing::info;

use crate::protocol::Frame;
use crate::session::SessionStore;

/// A fully reassembled upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reassembled {
    pub user_id: String,
    pub payload: String,
}

#[derive(Clone)]
pub struct Reassembler {
    store: SessionStore,
    page_size: usize,
}

impl Reassembler {
    pub fn new(store: SessionStore, page_size: usize) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub async fn open_session(&self, connection: &ConnectionId, user_id: &str) {
        self.store.open_session(connection, user_id).await;
        info!(connection = %connection, user = user_id, "Session opened");
    }

    /// Store the part the client sent with 0-based `client_index`.
    pub async fn append_fragment(&self, connection: &ConnectionId, client_index: u32, part: String) {
        let index = Frame::fragment_index(client_index);
        self.store.put_fragment(connection, index, part).await;
    }

    /// Read every fragment back in index order and join them.
    ///
    /// The session is not deleted; it expires with its TTL.
    pub async fn close_session(&self, connection: &ConnectionId) -> Result<Reassembled, ChatError> {
        let user_id = self
            .store
            .owner(connection)
            .await
            .ok_or_else(|| ChatError::SessionNotFound(connection.to_string()))?;

        let mut fragments = Vec::new();
        let mut cursor = None;
        loop {
            let page = self
                .store
                .query_fragments(connection, cursor, self.page_size)
                .await;
            fragments.extend(page.items);
            match page.last_evaluated {
                Some(last) => cursor = Some(last),
                None => break,
            }
        }
        fragments.sort_by_key(|(index, _)| *index);

        let payload: String = fragments.iter().map(|(_, part)| part.as_str()).collect();
        info!(
            connection = %connection,
            fragments = fragments.len(),
            bytes = payload.len(),
            "Reassembled message"
        );
        Ok(Reassembled { user_id, payload })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn reassembler(page_size: usize) -> Reassembler {
        Reassembler::new(SessionStore::new(Duration::from_secs(120)), page_size)
    }

    #[tokio::test]
    async fn end_before_start_is_session_not_found() {
        let r = reassembler(10);
        let c = ConnectionId::from("c1");
        r.append_fragment(&c, 0, "orphan".into()).await;
        let err = r.close_session(&c).await.unwrap_err();
        assert!(matches!(err, ChatError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn any_arrival_order_reassembles_in_index_order() {
        let parts = ["{\"bot", "_id\":", "\"b1\",", "\"x\":", "1}"];
        let orders: [[u32; 5]; 4] = [
            [0, 1, 2, 3, 4],
            [4, 3, 2, 1, 0],
            [2, 0, 4, 1, 3],
            [1, 3, 0, 4, 2],
        ];
        for order in orders {
            let r = reassembler(2);
            let c = ConnectionId::from("c1");
            r.open_session(&c, "alice").await;
            for i in order {
                r.append_fragment(&c, i, parts[i as usize].to_string()).await;
            }
            let out = r.close_session(&c).await.unwrap();
            assert_eq!(out.user_id, "alice");
            assert_eq!(out.payload, parts.concat(), "order {order:?}");
        }
    }

    #[tokio::test]
    async fn paginates_past_page_size() {
        let r = reassembler(3);
        let c = ConnectionId::from("c1");
        r.open_session(&c, "alice").await;
        let expected: String = (0..10).map(|i| i.to_string()).collect();
        for i in (0..10u32).rev() {
            r.append_fragment(&c, i, i.to_string()).await;
        }
        assert_eq!(r.close_session(&c).await.unwrap().payload, expected);
    }

    #[tokio::test]
    async fn numeric_order_beats_lexical_order() {
        let r = reassembler(100);
        let c = ConnectionId::from("c1");
        r.open_session(&c, "alice").await;
        r.append_fragment(&c, 10, "c".into()).await;
        r.append_fragment(&c, 1, "b".into()).await;
        r.append_fragment(&c, 0, "a".into()).await;
        assert_eq!(r.close_session(&c).await.unwrap().payload, "abc");
    }

    #[tokio::test]
    async fn empty_upload_reassembles_to_empty_payload() {
        let r = reassembler(10);
        let c = ConnectionId::from("c1");
        r.open_session(&c, "alice").await;
        assert_eq!(r.close_session(&c).await.unwrap().payload, "");
    }

    #[tokio::test]
    async fn close_leaves_the_session_for_the_reaper() {
        let r = reassembler(10);
        let c = ConnectionId::from("c1");
        r.open_session(&c, "alice").await;
        r.close_session(&c).await.unwrap();
        assert_eq!(r.store().count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_session_is_not_found() {
        let r = reassembler(10);
        let c = ConnectionId::from("c1");
        r.open_session(&c, "alice").await;
        tokio::time::advance(Duration::from_secs(121)).await;
        assert!(matches!(
            r.close_session(&c).await,
            Err(ChatError::SessionNotFound(_))
        ));
    }
}
