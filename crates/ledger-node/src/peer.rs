//! The peer protocol state machine.
//!
//! A [`PeerNode`] exclusively owns its ledger, transaction pool, peer tables
//! and block-group buffer. Helper tasks (listener, transaction generator,
//! miner) reach it only through queues that [`PeerNode::tick`] drains without
//! blocking. All timeouts compare the `now` passed into `tick` against
//! recorded timestamps.

use crate::config::NodeConfig;
use crate::constants::{
    BLOCK_GROUP_TIMEOUT, BLOCK_REQUEST_INTERVAL, CYCLE_SLEEP, HEARTBEAT_SPACING,
    INBOUND_QUEUE_CAPACITY, NEIGHBOUR_REQUEST_INTERVAL, PEER_TIMEOUT,
};
use crate::message::{Message, Payload, PeerAddress};
use crate::miner::{BlockingMiner, MinedBlock, Miner, MiningJob};
use crate::report::{summarize, Report, Reporter};
use crate::transport::Transport;
use ledger_core::{Block, Hash, Ledger, MerkleTree, Transaction, GENESIS};
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

/// Blocks waiting for the block they extend, newest first.
#[derive(Debug)]
struct BlockGroup {
    blocks: Vec<Block>,
    updated: Instant,
}

/// Producer ends of the node's input queues.
#[derive(Clone, Debug)]
pub struct NodeInputs {
    pub inbound: mpsc::Sender<Message>,
    pub transactions: mpsc::UnboundedSender<Transaction>,
}

pub struct PeerNode<T: Transport> {
    config: NodeConfig,
    transport: T,
    miner: Box<dyn Miner>,
    rng: StdRng,
    reporter: Reporter,

    ledger: Ledger,
    pending: BTreeMap<Hash, Transaction>,
    neighbours: HashMap<PeerAddress, Instant>,
    members: HashMap<PeerAddress, Instant>,
    block_groups: HashMap<Hash, BlockGroup>,
    received_trees: HashMap<Hash, MerkleTree>,

    last_ping: HashMap<PeerAddress, Instant>,
    last_neighbour_request: Option<Instant>,
    last_block_request: Option<Instant>,
    reported_neighbours: Vec<PeerAddress>,
    mining: bool,
    started: Instant,

    inbound: mpsc::Receiver<Message>,
    local_transactions: mpsc::UnboundedReceiver<Transaction>,
    mined_tx: mpsc::UnboundedSender<MinedBlock>,
    mined_rx: mpsc::UnboundedReceiver<MinedBlock>,
}

impl<T: Transport> PeerNode<T> {
    pub fn new(config: NodeConfig, transport: T) -> (Self, NodeInputs) {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let (inbound_tx, inbound) = mpsc::channel(INBOUND_QUEUE_CAPACITY);
        let (transactions_tx, local_transactions) = mpsc::unbounded_channel();
        let (mined_tx, mined_rx) = mpsc::unbounded_channel();

        let node = Self {
            config,
            transport,
            miner: Box::new(BlockingMiner),
            rng,
            reporter: Reporter::disabled(),
            ledger: Ledger::new(),
            pending: BTreeMap::new(),
            neighbours: HashMap::new(),
            members: HashMap::new(),
            block_groups: HashMap::new(),
            received_trees: HashMap::new(),
            last_ping: HashMap::new(),
            last_neighbour_request: None,
            last_block_request: None,
            reported_neighbours: Vec::new(),
            mining: false,
            started: Instant::now(),
            inbound,
            local_transactions,
            mined_tx,
            mined_rx,
        };
        let inputs = NodeInputs {
            inbound: inbound_tx,
            transactions: transactions_tx,
        };
        (node, inputs)
    }

    pub fn with_reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Start from an existing ledger instead of an empty one.
    pub fn with_ledger(mut self, ledger: Ledger) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn with_miner(mut self, miner: impl Miner) -> Self {
        self.miner = Box::new(miner);
        self
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn address(&self) -> PeerAddress {
        self.config.listen
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn has_pending(&self, hash: &Hash) -> bool {
        self.pending.contains_key(hash)
    }

    pub fn neighbours(&self) -> Vec<PeerAddress> {
        sorted(self.neighbours.keys().copied())
    }

    pub fn members(&self) -> Vec<PeerAddress> {
        sorted(self.members.keys().copied())
    }

    /// Number of buffered, not yet linked block groups.
    pub fn buffered_groups(&self) -> usize {
        self.block_groups.len()
    }

    pub fn is_mining(&self) -> bool {
        self.mining
    }

    /// True once the configured time to live has elapsed.
    pub fn expired(&self, now: Instant) -> bool {
        self.config
            .lifetime()
            .is_some_and(|ttl| now.saturating_duration_since(self.started) >= ttl)
    }

    /// Drive the node until its time to live elapses.
    pub async fn run(mut self) {
        info!(
            address = %self.config.listen,
            bootstrap = self.config.bootstrap,
            miner = self.config.miner,
            "peer started"
        );
        loop {
            let now = Instant::now();
            if self.expired(now) {
                info!(address = %self.config.listen, "time to live elapsed, shutting down");
                break;
            }
            self.tick(now);
            tokio::time::sleep(CYCLE_SLEEP).await;
        }
    }

    /// One cycle of the event loop.
    pub fn tick(&mut self, now: Instant) {
        if self.config.bootstrap {
            self.upkeep_members(now);
        }
        self.acquire_neighbours(now);
        self.upkeep_neighbours(now);
        self.maybe_start_mining();

        while let Ok(message) = self.inbound.try_recv() {
            self.handle_message(message, now);
        }

        while let Ok(transaction) = self.local_transactions.try_recv() {
            self.reporter
                .emit(Report::TransactionCreated(transaction.clone()));
            self.pending.insert(transaction.hash(), transaction.clone());
            self.broadcast(Payload::NewTransaction(transaction), None);
        }

        if self.mining {
            if let Ok(MinedBlock { block, tree }) = self.mined_rx.try_recv() {
                self.mining = false;
                let hash = block.hash();
                if self.extend_ledger(vec![block.clone()], vec![tree.clone()]) {
                    self.reporter.emit(Report::BlockMined(hash));
                    self.broadcast(Payload::NewBlock { block, tree }, None);
                } else {
                    debug!(hash = %hash.short(), "mined block lost the race");
                }
            }
        }

        self.reconcile_block_groups(now);
        self.report_connections();
    }

    pub fn handle_message(&mut self, message: Message, now: Instant) {
        let Message { sender, payload } = message;
        let in_neighbours = self.neighbours.contains_key(&sender);
        trace!(peer = %sender, kind = payload.kind(), "inbound message");

        match payload {
            Payload::ConnectionRequest => {
                if sender == self.config.listen {
                    return;
                }
                if in_neighbours || self.neighbours.len() < self.config.max_neighbours {
                    self.neighbours.insert(sender, now);
                    self.send(sender, Payload::ConnectionAccept);
                } else {
                    self.send(sender, Payload::ConnectionReject);
                }
            }
            Payload::ConnectionAccept => {
                self.neighbours.insert(sender, now);
            }
            Payload::ConnectionReject => {}
            Payload::NewTransaction(transaction) => {
                if !in_neighbours || !transaction.present {
                    return;
                }
                let hash = transaction.hash();
                if self.pending.contains_key(&hash) {
                    return;
                }
                self.reporter
                    .emit(Report::TransactionReceived(transaction.clone()));
                self.pending.insert(hash, transaction.clone());
                self.broadcast(Payload::NewTransaction(transaction), Some(sender));
            }
            Payload::NewBlock { block, tree } => {
                self.receive_block(sender, in_neighbours, block, tree, now);
            }
            Payload::NeedBlock(hash) => {
                let Some(block) = self.ledger.block(&hash) else {
                    return;
                };
                if let Some(tree) = self.ledger.merkle_tree(&block.merkle_root) {
                    let payload = Payload::NewBlock {
                        block: block.clone(),
                        tree: tree.clone(),
                    };
                    self.send(sender, payload);
                }
            }
            Payload::NeedPeerList => {
                if !self.config.bootstrap {
                    return;
                }
                let members = self.members();
                self.members.insert(sender, now);
                self.send(sender, Payload::PeerList(members));
            }
            Payload::PeerList(addresses) => {
                if sender == self.config.bootstrap_address {
                    self.try_add_neighbours(addresses);
                }
            }
            Payload::HeartbeatPing => {
                if self.heartbeat_from(sender, in_neighbours, now) {
                    self.send(sender, Payload::HeartbeatPong);
                }
            }
            Payload::HeartbeatPong => {
                self.heartbeat_from(sender, in_neighbours, now);
            }
        }
    }

    /// Refresh contact times for a heartbeat. Returns false when the sender is
    /// neither a neighbour nor the bootstrap node and we are not bootstrap.
    fn heartbeat_from(&mut self, sender: PeerAddress, in_neighbours: bool, now: Instant) -> bool {
        let from_bootstrap = sender == self.config.bootstrap_address;
        if !(in_neighbours || from_bootstrap || self.config.bootstrap) {
            return false;
        }
        if in_neighbours {
            self.neighbours.insert(sender, now);
        }
        if self.config.bootstrap {
            self.members.insert(sender, now);
        }
        true
    }

    fn receive_block(
        &mut self,
        sender: PeerAddress,
        in_neighbours: bool,
        block: Block,
        tree: MerkleTree,
        now: Instant,
    ) {
        if self.config.bad_node || !in_neighbours {
            return;
        }
        let acceptable = block.is_valid()
            && tree.is_valid()
            && tree.built_root() == Some(block.merkle_root)
            && block.difficulty >= self.config.difficulty;
        if !acceptable {
            debug!(peer = %sender, "rejecting invalid block");
            return;
        }

        let hash = block.hash();
        self.reporter.emit(Report::BlockReceived(hash));
        self.received_trees.insert(block.merkle_root, tree);

        // Blocks already buffered on top of this one join its run.
        let successors = self.block_groups.remove(&hash);
        let mut run = successors
            .as_ref()
            .map(|group| group.blocks.clone())
            .unwrap_or_default();
        let anchor = block.previous;
        run.push(block);

        let merged = match self.block_groups.get_mut(&anchor) {
            Some(existing) => {
                existing.updated = now;
                let longer = run.len() > existing.blocks.len();
                if longer {
                    existing.blocks = run;
                }
                longer
            }
            None => {
                self.block_groups.insert(
                    anchor,
                    BlockGroup {
                        blocks: run,
                        updated: now,
                    },
                );
                true
            }
        };
        // A losing run keeps its successors waiting on this block.
        if let (false, Some(group)) = (merged, successors) {
            debug!(
                anchor = %anchor.short(),
                block = %hash.short(),
                kept = group.blocks.len(),
                "competing run lost, keeping its successors buffered"
            );
            self.block_groups.insert(hash, group);
        }
    }

    /// Link every buffered group whose anchor is known, ask neighbours for
    /// the anchors that are not, and drop groups idle for too long.
    fn reconcile_block_groups(&mut self, now: Instant) {
        let anchors: Vec<Hash> = self.block_groups.keys().copied().collect();
        let mut missing = Vec::new();

        for anchor in anchors {
            let Some(group) = self.block_groups.get(&anchor) else {
                continue;
            };
            if now.saturating_duration_since(group.updated) > BLOCK_GROUP_TIMEOUT {
                debug!(anchor = %anchor.short(), "dropping stale block group");
                self.block_groups.remove(&anchor);
                continue;
            }
            if anchor != GENESIS && !self.ledger.contains_block(&anchor) {
                missing.push(anchor);
                continue;
            }

            let Some(group) = self.block_groups.remove(&anchor) else {
                continue;
            };
            let mut blocks = group.blocks;
            blocks.reverse();
            let trees: Option<Vec<MerkleTree>> = blocks
                .iter()
                .map(|block| self.received_trees.get(&block.merkle_root).cloned())
                .collect();
            let Some(trees) = trees else {
                debug!(anchor = %anchor.short(), "block group is missing a merkle tree");
                continue;
            };
            let newest = blocks.last().cloned().zip(trees.last().cloned());
            if self.extend_ledger(blocks, trees) {
                if let Some((block, tree)) = newest {
                    self.broadcast(Payload::NewBlock { block, tree }, None);
                }
            }
        }

        let due = self
            .last_block_request
            .is_none_or(|last| now.saturating_duration_since(last) >= BLOCK_REQUEST_INTERVAL);
        if !missing.is_empty() && due {
            for anchor in missing {
                self.broadcast(Payload::NeedBlock(anchor), None);
            }
            self.last_block_request = Some(now);
        }

        let referenced: HashSet<Hash> = self
            .block_groups
            .values()
            .flat_map(|group| group.blocks.iter().map(|block| block.merkle_root))
            .collect();
        self.received_trees.retain(|root, _| referenced.contains(root));
    }

    /// Append a run to the ledger; on success drop its transactions from the
    /// pending pool.
    fn extend_ledger(&mut self, blocks: Vec<Block>, trees: Vec<MerkleTree>) -> bool {
        match self.ledger.extend(blocks, trees) {
            Ok(outcome) => {
                self.pending
                    .retain(|hash, _| !outcome.committed.contains(hash));
                let height = self.ledger.height();
                info!(
                    address = %self.config.listen,
                    height,
                    tip = %outcome.tip.short(),
                    "ledger extended"
                );
                self.reporter.emit(Report::LedgerUpdated {
                    height,
                    tip: outcome.tip,
                });
                self.reporter
                    .emit(Report::LedgerSnapshot(summarize(&self.ledger)));
                true
            }
            Err(err) => {
                debug!(error = %err, "ledger extension rejected");
                false
            }
        }
    }

    fn maybe_start_mining(&mut self) {
        let batch_size = self.config.transactions_per_block.max(1);
        if self.mining || !self.config.miner || self.pending.len() < batch_size {
            return;
        }
        let job = MiningJob {
            transactions: self.pending.values().take(batch_size).cloned().collect(),
            previous: self.ledger.longest_chain_tip(),
            difficulty: self.config.difficulty,
            parallel: self.config.parallel_mining,
            seed: self.rng.gen(),
        };
        debug!(previous = %job.previous.short(), difficulty = job.difficulty, "starting mining attempt");
        self.mining = true;
        self.miner.start(job, self.mined_tx.clone());
    }

    fn upkeep_members(&mut self, now: Instant) {
        let (expired, quiet) = partition_by_silence(&self.members, now);
        for member in expired {
            debug!(member = %member, "member left the network");
            self.members.remove(&member);
            self.last_ping.remove(&member);
        }
        for member in quiet {
            self.ping(member, now);
        }
    }

    fn acquire_neighbours(&mut self, now: Instant) {
        if self.neighbours.len() >= self.config.neighbour_target() {
            return;
        }
        if let Some(last) = self.last_neighbour_request {
            if now.saturating_duration_since(last) <= NEIGHBOUR_REQUEST_INTERVAL {
                return;
            }
        }
        if self.config.bootstrap {
            let members = self.members();
            self.try_add_neighbours(members);
        } else {
            self.send(self.config.bootstrap_address, Payload::NeedPeerList);
        }
        self.last_neighbour_request = Some(now);
    }

    fn upkeep_neighbours(&mut self, now: Instant) {
        let (expired, quiet) = partition_by_silence(&self.neighbours, now);
        for neighbour in expired {
            debug!(neighbour = %neighbour, "neighbour timed out");
            self.neighbours.remove(&neighbour);
            self.last_ping.remove(&neighbour);
        }
        for neighbour in quiet {
            self.ping(neighbour, now);
        }

        let surplus = self
            .neighbours
            .len()
            .saturating_sub(self.config.max_neighbours);
        if surplus > 0 {
            let mut current = self.neighbours();
            current.shuffle(&mut self.rng);
            for neighbour in current.into_iter().take(surplus) {
                self.neighbours.remove(&neighbour);
                self.last_ping.remove(&neighbour);
            }
        }
    }

    /// Ask random, not yet connected addresses to become neighbours, up to
    /// the neighbour target.
    fn try_add_neighbours(&mut self, mut candidates: Vec<PeerAddress>) {
        let mut needed = self
            .config
            .neighbour_target()
            .saturating_sub(self.neighbours.len());
        candidates.sort();
        candidates.shuffle(&mut self.rng);
        for candidate in candidates {
            if needed == 0 {
                break;
            }
            if candidate == self.config.listen || self.neighbours.contains_key(&candidate) {
                continue;
            }
            self.send(candidate, Payload::ConnectionRequest);
            needed -= 1;
        }
    }

    fn ping(&mut self, target: PeerAddress, now: Instant) {
        if let Some(last) = self.last_ping.get(&target) {
            if now.saturating_duration_since(*last) < HEARTBEAT_SPACING {
                return;
            }
        }
        self.send(target, Payload::HeartbeatPing);
        self.last_ping.insert(target, now);
    }

    fn report_connections(&mut self) {
        let current = self.neighbours();
        if current != self.reported_neighbours {
            self.reporter.emit(Report::Connections(current.clone()));
            self.reported_neighbours = current;
        }
    }

    fn send(&self, target: PeerAddress, payload: Payload) {
        self.transport
            .send(Message::new(self.config.listen, payload), target);
    }

    /// Send to every neighbour except `except`.
    fn broadcast(&self, payload: Payload, except: Option<PeerAddress>) {
        let message = Message::new(self.config.listen, payload);
        for neighbour in self.neighbours.keys() {
            if Some(*neighbour) != except {
                self.transport.send(message.clone(), *neighbour);
            }
        }
    }
}

fn sorted(addresses: impl Iterator<Item = PeerAddress>) -> Vec<PeerAddress> {
    let mut out: Vec<PeerAddress> = addresses.collect();
    out.sort();
    out
}

/// Split a contact table into peers silent past the timeout and peers silent
/// past half of it.
fn partition_by_silence(
    table: &HashMap<PeerAddress, Instant>,
    now: Instant,
) -> (Vec<PeerAddress>, Vec<PeerAddress>) {
    let mut expired = Vec::new();
    let mut quiet = Vec::new();
    for (address, last_contact) in table {
        let silence: Duration = now.saturating_duration_since(*last_contact);
        if silence > PEER_TIMEOUT {
            expired.push(*address);
        } else if silence > PEER_TIMEOUT / 2 {
            quiet.push(*address);
        }
    }
    expired.sort();
    quiet.sort();
    (expired, quiet)
}
