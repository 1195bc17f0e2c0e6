//! The simulation facade: one handle over the world, markets, and job board.
//!
//! The command layer talks only to [`Simulation`]. Every operation reads the
//! current instant from the injected [`Clock`], delegates to the owning
//! service, and publishes any resulting [`Notice`] to the broadcast sink
//! after the change has committed. The two background sweeps the
//! [`Scheduler`](crate::scheduler::Scheduler) drives are exposed here as
//! [`Simulation::run_job_cycle`] and [`Simulation::run_upkeep`].

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::SmallRng;
use tokio::sync::Mutex;
use tracing::{debug, info};

use kingdom_economy::{
    Accounts, BuffProvider, GameCalendar, JobBoard, Market, MarketMakers, NoBuffs, Treasury,
};
use kingdom_ledger::{ConservationResult, Ledger};
use kingdom_types::{
    ActiveClaim, Coord, GameDay, GridSnapshot, Item, Job, JobClaim, JobId, MarketMakerBoard,
    Notice, PlayerAccount, PlayerId, PurchaseReceipt, Resource, SaleReceipt, Settlement,
    SettlementId, StakeReceipt, StockLine, WorldMeta,
};
use kingdom_world::{SettlementRegistry, World, generate_world};

use crate::clock::{Clock, DayTracker, SystemClock};
use crate::collaborators::{BroadcastSink, NullSink, Presence};
use crate::config::KingdomConfig;
use crate::error::CoreError;

/// What one upkeep sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpkeepReport {
    /// The day that just ended, if the sweep saw a rollover.
    pub ended: Option<GameDay>,
    /// Settlements whose treasury quotas were refilled.
    pub quotas_restored: usize,
    /// Market-maker stakes that lapsed.
    pub stakes_lapsed: usize,
}

/// Assembles a [`Simulation`] from configuration and collaborators.
pub struct SimulationBuilder {
    config: KingdomConfig,
    ledger: Arc<Ledger>,
    world: Arc<World>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn BroadcastSink>,
    buffs: Arc<dyn BuffProvider>,
    rng_seed: Option<u64>,
}

impl SimulationBuilder {
    /// Use an existing ledger, e.g. one restored from storage.
    #[must_use]
    pub fn ledger(mut self, ledger: Arc<Ledger>) -> Self {
        self.ledger = ledger;
        self
    }

    /// Use an existing world handle.
    #[must_use]
    pub fn world(mut self, world: Arc<World>) -> Self {
        self.world = world;
        self
    }

    /// Read time from `clock` instead of the system clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Publish notices to `sink`.
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn BroadcastSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Read building buffs from `buffs`.
    #[must_use]
    pub fn buffs(mut self, buffs: Arc<dyn BuffProvider>) -> Self {
        self.buffs = buffs;
        self
    }

    /// Seed job generation for reproducible boards.
    #[must_use]
    pub const fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Wire the services together.
    pub fn build(self) -> Simulation {
        let config = self.config;
        let ledger = self.ledger;
        let presence = Arc::new(Presence::new());
        let maker_config = config.market_maker.market_maker_config();
        let calendar = GameCalendar::new(maker_config.day_length);
        let market_config = config.market.market_config();
        let rng = self
            .rng_seed
            .map_or_else(SmallRng::from_os_rng, SmallRng::seed_from_u64);

        Simulation {
            registry: SettlementRegistry::new(
                Arc::clone(&ledger),
                self.world,
                config.settlement.rules(),
            ),
            market: Market::new(
                Arc::clone(&ledger),
                market_config.clone(),
                calendar,
                Arc::clone(&self.buffs),
            ),
            makers: MarketMakers::new(
                Arc::clone(&ledger),
                maker_config,
                Arc::clone(&presence) as Arc<dyn kingdom_economy::PresenceProvider>,
            ),
            jobs: JobBoard::new(Arc::clone(&ledger), config.jobs.job_config()),
            treasury: Treasury::new(Arc::clone(&ledger), market_config),
            accounts: Accounts::new(Arc::clone(&ledger)),
            calendar,
            days: DayTracker::new(),
            rng: Mutex::new(rng),
            buffs: self.buffs,
            presence,
            sink: self.sink,
            clock: self.clock,
            ledger,
            config,
        }
    }
}

/// The simulation core behind the command layer.
pub struct Simulation {
    config: KingdomConfig,
    ledger: Arc<Ledger>,
    registry: SettlementRegistry,
    market: Market,
    makers: MarketMakers,
    jobs: JobBoard,
    treasury: Treasury,
    accounts: Accounts,
    calendar: GameCalendar,
    days: DayTracker,
    rng: Mutex<SmallRng>,
    buffs: Arc<dyn BuffProvider>,
    presence: Arc<Presence>,
    sink: Arc<dyn BroadcastSink>,
    clock: Arc<dyn Clock>,
}

impl core::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Simulation")
            .field("calendar", &self.calendar)
            .field("online", &self.presence.total())
            .finish_non_exhaustive()
    }
}

impl Simulation {
    /// Start assembling a simulation with default collaborators: a fresh
    /// ledger and world, the system clock, no buffs, and no listeners.
    pub fn builder(config: KingdomConfig) -> SimulationBuilder {
        SimulationBuilder {
            config,
            ledger: Arc::new(Ledger::new()),
            world: Arc::new(World::new()),
            clock: Arc::new(SystemClock),
            sink: Arc::new(NullSink),
            buffs: Arc::new(NoBuffs),
            rng_seed: None,
        }
    }

    // -------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------

    /// The loaded configuration.
    pub const fn config(&self) -> &KingdomConfig {
        &self.config
    }

    /// The shared ledger.
    pub const fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// The settlement registry.
    pub const fn registry(&self) -> &SettlementRegistry {
        &self.registry
    }

    /// Online players.
    pub fn presence(&self) -> &Presence {
        &self.presence
    }

    /// The game-day calendar.
    pub const fn calendar(&self) -> GameCalendar {
        self.calendar
    }

    fn notify(&self, notice: Notice) {
        self.sink.publish(notice);
    }

    async fn name_of(&self, player: PlayerId) -> String {
        self.ledger
            .player(player)
            .await
            .map_or_else(|| player.to_string(), |a| a.name)
    }

    // -------------------------------------------------------------------
    // World
    // -------------------------------------------------------------------

    /// Generate the world, defaulting seed and size from configuration.
    ///
    /// Without `force` an existing world is returned unchanged.
    pub async fn generate_world(
        &self,
        seed: Option<String>,
        size: Option<u32>,
        force: bool,
    ) -> Result<WorldMeta, CoreError> {
        let mut gen_config = self.config.world.gen_config();
        if let Some(seed) = seed {
            gen_config.seed = seed;
        }
        if let Some(size) = size {
            gen_config.size = size;
        }
        let meta = generate_world(&self.registry, &gen_config, force, self.clock.now()).await?;
        Ok(meta)
    }

    /// Metadata of the current world.
    pub async fn world_meta(&self) -> Option<WorldMeta> {
        self.registry.world().meta().await
    }

    /// Every cell plus settlement markers.
    pub async fn grid_cells(&self) -> Option<GridSnapshot> {
        self.registry.snapshot().await
    }

    // -------------------------------------------------------------------
    // Settlements
    // -------------------------------------------------------------------

    /// Look up a settlement by name.
    pub async fn find_settlement(&self, name: &str) -> Option<Settlement> {
        self.registry.find(name).await
    }

    /// Look up a settlement, creating an unplaced one if missing.
    pub async fn ensure_settlement(&self, name: &str) -> Result<Settlement, CoreError> {
        Ok(self.registry.ensure(name).await?)
    }

    /// Found a town. The founder moves into it.
    pub async fn found_settlement(
        &self,
        founder: Option<PlayerId>,
        name: &str,
        coord: Option<Coord>,
    ) -> Result<Settlement, CoreError> {
        let town = self.registry.found(founder, name, coord).await?;
        let by = match founder {
            Some(player) => {
                self.presence.moved(player, town.id);
                self.name_of(player).await
            }
            None => "the crown".to_owned(),
        };
        let at = town.coord.map_or_else(String::new, |c| format!(" at {c}"));
        self.notify(Notice::global(format!("{} was founded by {by}{at}", town.name)));
        Ok(town)
    }

    /// Make the player's current settlement their home.
    pub async fn settle(&self, player: PlayerId) -> Result<Settlement, CoreError> {
        Ok(self.registry.settle(player).await?)
    }

    /// Count a finished building in `settlement`.
    pub async fn record_building(&self, settlement: SettlementId) -> Result<Settlement, CoreError> {
        let buffs = self.buffs.buffs(settlement);
        Ok(self.registry.record_building(settlement, &buffs).await?)
    }

    /// Remove every settlement except the capital.
    pub async fn reset_settlements(&self) -> Result<Vec<SettlementId>, CoreError> {
        let removed = self.registry.reset().await?;
        for player in self.presence.players() {
            if let Some(account) = self.ledger.player(player).await {
                self.presence.moved(player, account.settlement);
            }
        }
        if !removed.is_empty() {
            self.notify(Notice::global(format!(
                "The realm was reset; {} settlement(s) dissolved",
                removed.len()
            )));
        }
        Ok(removed)
    }

    // -------------------------------------------------------------------
    // Accounts and transfers
    // -------------------------------------------------------------------

    /// Bring a player online, opening an account in the capital on first
    /// sight.
    pub async fn connect(&self, player: PlayerId, name: &str) -> Result<PlayerAccount, CoreError> {
        let account = match self.ledger.player(player).await {
            Some(account) => account,
            None => {
                let capital = self
                    .registry
                    .capital()
                    .await
                    .ok_or(kingdom_world::WorldError::NoWorld)?;
                self.accounts
                    .open_account(player, name, capital.id, 0)
                    .await?
            }
        };
        self.presence.enter(player, account.settlement);
        debug!(%player, settlement = %account.settlement, "Player connected");
        Ok(account)
    }

    /// Take a player offline.
    pub fn disconnect(&self, player: PlayerId) {
        self.presence.leave(player);
    }

    /// Record that a player moved to `settlement`.
    pub async fn relocate(
        &self,
        player: PlayerId,
        settlement: SettlementId,
    ) -> Result<PlayerAccount, CoreError> {
        let account = self.accounts.relocate(player, settlement).await?;
        self.presence.moved(player, settlement);
        Ok(account)
    }

    /// A player's balances.
    pub async fn account(&self, player: PlayerId) -> Result<PlayerAccount, CoreError> {
        self.accounts
            .account(player)
            .await
            .ok_or(CoreError::UnknownPlayer(player))
    }

    /// Pay gold to a player in the same settlement.
    pub async fn pay(&self, from: PlayerId, to: PlayerId, amount: u64) -> Result<PlayerAccount, CoreError> {
        Ok(self.accounts.pay(from, to, amount).await?)
    }

    /// Give goods to a player in the same settlement.
    pub async fn give(
        &self,
        from: PlayerId,
        to: PlayerId,
        resource: Resource,
        quantity: u64,
    ) -> Result<PlayerAccount, CoreError> {
        Ok(self.accounts.give(from, to, resource, quantity).await?)
    }

    // -------------------------------------------------------------------
    // Market
    // -------------------------------------------------------------------

    /// Sell goods in the player's settlement.
    pub async fn sell(
        &self,
        player: PlayerId,
        resource: Resource,
        quantity: u64,
    ) -> Result<SaleReceipt, CoreError> {
        let receipt = self
            .market
            .sell(player, resource, quantity, self.clock.now())
            .await?;
        if let Some(account) = self.ledger.player(player).await {
            self.notify(Notice::local(
                account.settlement,
                format!(
                    "{} sold {quantity} {resource} for {}g",
                    account.name,
                    receipt.total_paid()
                ),
            ));
        }
        Ok(receipt)
    }

    /// Buy a resource or tool in the player's settlement.
    pub async fn buy(
        &self,
        player: PlayerId,
        item: Item,
        quantity: Option<u64>,
    ) -> Result<PurchaseReceipt, CoreError> {
        let receipt = self
            .market
            .buy(player, item, quantity, self.clock.now())
            .await?;
        if let Some(account) = self.ledger.player(player).await {
            let what = match item {
                Item::Resource(r) => r.display_name(),
                Item::Tool(t) => t.name(),
            };
            self.notify(Notice::local(
                account.settlement,
                format!(
                    "{} bought {} {what} for {}g",
                    account.name,
                    quantity.unwrap_or(1),
                    receipt.cost
                ),
            ));
        }
        Ok(receipt)
    }

    /// Market stock of a settlement.
    pub async fn stock_of(&self, settlement: SettlementId) -> Vec<StockLine> {
        self.market.stock_of(settlement).await
    }

    /// Stake resources for today's market-maker slot.
    pub async fn claim_market_maker(
        &self,
        player: PlayerId,
        settlement: SettlementId,
        resource: Resource,
    ) -> Result<StakeReceipt, CoreError> {
        let receipt = self
            .makers
            .claim(player, settlement, resource, self.clock.now())
            .await?;
        let name = self.name_of(player).await;
        self.notify(Notice::local(
            settlement,
            format!(
                "{name} is today's {resource} market maker ({}% commission)",
                receipt.percent
            ),
        ));
        Ok(receipt)
    }

    /// Today's stakes in a settlement.
    pub async fn market_maker_status(&self, settlement: SettlementId) -> MarketMakerBoard {
        self.makers.status(settlement, self.clock.now()).await
    }

    // -------------------------------------------------------------------
    // Treasury
    // -------------------------------------------------------------------

    /// Move the player's gold into their settlement's treasury.
    pub async fn fund_treasury(&self, player: PlayerId, amount: u64) -> Result<Settlement, CoreError> {
        Ok(self.treasury.fund(player, amount).await?)
    }

    /// Set a treasury floor price.
    pub async fn set_floor(
        &self,
        actor: PlayerId,
        settlement: SettlementId,
        resource: Resource,
        floor: u64,
    ) -> Result<Settlement, CoreError> {
        Ok(self.treasury.set_floor(actor, settlement, resource, floor).await?)
    }

    /// Set a daily treasury quota.
    pub async fn set_daily_quota(
        &self,
        actor: PlayerId,
        settlement: SettlementId,
        resource: Resource,
        amount: u64,
    ) -> Result<Settlement, CoreError> {
        Ok(self
            .treasury
            .set_daily_quota(actor, settlement, resource, amount)
            .await?)
    }

    /// Set the settlement tax rate.
    pub async fn set_tax_rate(
        &self,
        actor: PlayerId,
        settlement: SettlementId,
        percent: u8,
    ) -> Result<Settlement, CoreError> {
        Ok(self.treasury.set_tax_rate(actor, settlement, percent).await?)
    }

    /// Set a market price.
    pub async fn set_price(
        &self,
        actor: PlayerId,
        settlement: SettlementId,
        item: Item,
        price: u64,
    ) -> Result<Settlement, CoreError> {
        Ok(self.treasury.set_price(actor, settlement, item, price).await?)
    }

    // -------------------------------------------------------------------
    // Jobs
    // -------------------------------------------------------------------

    /// Open jobs in a settlement, oldest first.
    pub async fn list_open_jobs(&self, settlement: SettlementId) -> Vec<Job> {
        self.jobs.list_open(settlement, self.clock.now()).await
    }

    /// Claim a job.
    pub async fn accept_job(&self, player: PlayerId, job: JobId) -> Result<ActiveClaim, CoreError> {
        Ok(self.jobs.accept(player, job, self.clock.now()).await?)
    }

    /// Complete the player's job.
    pub async fn deliver_job(&self, player: PlayerId) -> Result<ActiveClaim, CoreError> {
        let done = self.jobs.deliver(player, self.clock.now()).await?;
        let name = self.name_of(player).await;
        self.notify(Notice::local(
            done.job.settlement,
            format!(
                "{name} completed job #{} and earned {}g",
                done.job.id, done.job.reward
            ),
        ));
        Ok(done)
    }

    /// Give up the player's job.
    pub async fn abandon_job(&self, player: PlayerId) -> Result<JobClaim, CoreError> {
        Ok(self.jobs.abandon(player, self.clock.now()).await?)
    }

    /// The player's live claim, if any.
    pub async fn current_claim(&self, player: PlayerId) -> Option<ActiveClaim> {
        self.jobs.current_claim(player, self.clock.now()).await
    }

    // -------------------------------------------------------------------
    // Sweeps
    // -------------------------------------------------------------------

    /// Expire old jobs and post new ones, announcing each posting in its
    /// settlement.
    pub async fn run_job_cycle(&self) -> Result<Vec<Job>, CoreError> {
        let now = self.clock.now();
        let posted = {
            let mut rng = self.rng.lock().await;
            self.jobs.generate(&mut *rng, now).await?
        };
        let names: BTreeMap<SettlementId, String> = self
            .ledger
            .settlements()
            .await
            .into_iter()
            .map(|s| (s.id, s.name))
            .collect();
        for job in &posted {
            self.notify(Notice::local(
                job.settlement,
                format!("New job posted: {}", describe_job(job, &names)),
            ));
        }
        Ok(posted)
    }

    /// Detect game-day rollover: refill quotas and lapse old stakes.
    pub async fn run_upkeep(&self) -> Result<UpkeepReport, CoreError> {
        let today = self.calendar.day_of(self.clock.now());
        let mut report = UpkeepReport {
            ended: self.days.observe(today),
            ..UpkeepReport::default()
        };
        if report.ended.is_some() {
            report.quotas_restored = self.treasury.restore_quotas().await?;
        }
        report.stakes_lapsed = self.makers.lapse(today).await?;
        if let Some(ended) = report.ended {
            info!(
                %ended,
                quotas = report.quotas_restored,
                stakes = report.stakes_lapsed,
                "Game day rolled over"
            );
            self.notify(Notice::global(format!(
                "A new day dawns ({today}); market-maker slots are open"
            )));
        }
        Ok(report)
    }

    /// Check that the journal balances for every asset, archived entries
    /// included.
    pub async fn audit(&self) -> Result<(), CoreError> {
        match self.ledger.audit().await {
            ConservationResult::Balanced => Ok(()),
            ConservationResult::Anomaly(anomaly) => Err(CoreError::Unbalanced(anomaly.message)),
        }
    }
}

/// One-line job summary for notices and listings.
pub fn describe_job(job: &Job, names: &BTreeMap<SettlementId, String>) -> String {
    match (job.resource, job.destination) {
        (Some(resource), _) => format!(
            "#{} {} - deliver {} {resource} - reward {}g",
            job.id,
            job.kind.name(),
            job.quantity,
            job.reward
        ),
        (None, Some(dest)) => {
            let dest = names.get(&dest).map_or("?", String::as_str);
            format!("#{} courier to {dest} - reward {}g", job.id, job.reward)
        }
        (None, None) => format!("#{} {} - reward {}g", job.id, job.kind.name(), job.reward),
    }
}
