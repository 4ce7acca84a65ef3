//! Per-chain request throttling.
//!
//! One queue fronts each chain's endpoint: a semaphore bounds in-flight
//! requests and a minimum inter-request gap enforces the configured
//! requests-per-second. Every engine component shares the same queue for a
//! chain, so historical fan-out cannot starve the realtime poll.

use std::{sync::Arc, time::Duration};

use alloy_primitives::{Bytes, B256};
use async_trait::async_trait;
use tokio::{
    sync::{mpsc, Mutex, Semaphore},
    time::Instant,
};
use tracery_primitives::{
    BlockRef, LogRecord, TraceRecord, TransactionReceiptRecord,
};

use crate::{BlockWithTransactions, CallRequest, EthClient, LogQuery, RpcError, TraceQuery};

#[derive(Debug)]
pub struct RequestQueue {
    permits: Semaphore,
    min_gap: Duration,
    next_slot: Mutex<Instant>,
}

impl RequestQueue {
    pub fn new(max_concurrency: usize, max_requests_per_second: u32) -> Self {
        debug_assert!(max_concurrency > 0);
        debug_assert!(max_requests_per_second > 0);
        Self {
            permits: Semaphore::new(max_concurrency),
            min_gap: Duration::from_secs(1) / max_requests_per_second,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    /// Waits for a rate slot and a concurrency permit, then runs `operation`.
    pub async fn run<T, F>(&self, operation: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .expect("request queue semaphore never closes");

        let slot = {
            let mut next_slot = self.next_slot.lock().await;
            let slot = (*next_slot).max(Instant::now());
            *next_slot = slot + self.min_gap;
            slot
        };
        tokio::time::sleep_until(slot).await;

        operation.await
    }
}

/// An [`EthClient`] that funnels every request through a [`RequestQueue`].
#[derive(Debug)]
pub struct ThrottledClient<C: ?Sized> {
    inner: Arc<C>,
    queue: Arc<RequestQueue>,
}

impl<C: ?Sized> ThrottledClient<C> {
    pub fn new(inner: Arc<C>, queue: Arc<RequestQueue>) -> Self {
        Self { inner, queue }
    }
}

#[async_trait]
impl<C: EthClient + ?Sized> EthClient for ThrottledClient<C> {
    async fn get_block_by_number(
        &self,
        number: u64,
        with_transactions: bool,
    ) -> Result<BlockWithTransactions, RpcError> {
        self.queue
            .run(self.inner.get_block_by_number(number, with_transactions))
            .await
    }

    async fn get_block_by_hash(
        &self,
        hash: B256,
        with_transactions: bool,
    ) -> Result<BlockWithTransactions, RpcError> {
        self.queue
            .run(self.inner.get_block_by_hash(hash, with_transactions))
            .await
    }

    async fn get_block_number(&self) -> Result<u64, RpcError> {
        self.queue.run(self.inner.get_block_number()).await
    }

    async fn get_logs(&self, query: LogQuery) -> Result<Vec<LogRecord>, RpcError> {
        self.queue.run(self.inner.get_logs(query)).await
    }

    async fn trace_block(&self, number: u64) -> Result<Vec<TraceRecord>, RpcError> {
        self.queue.run(self.inner.trace_block(number)).await
    }

    async fn trace_filter(&self, query: TraceQuery) -> Result<Vec<TraceRecord>, RpcError> {
        self.queue.run(self.inner.trace_filter(query)).await
    }

    async fn get_transaction_receipt(
        &self,
        hash: B256,
    ) -> Result<TransactionReceiptRecord, RpcError> {
        self.queue.run(self.inner.get_transaction_receipt(hash)).await
    }

    async fn call(&self, request: CallRequest) -> Result<Bytes, RpcError> {
        self.queue.run(self.inner.call(request)).await
    }

    async fn subscribe_new_heads(&self) -> Result<mpsc::Receiver<BlockRef>, RpcError> {
        // Subscriptions are long-lived; only their setup takes a slot.
        self.queue.run(self.inner.subscribe_new_heads()).await
    }
}
