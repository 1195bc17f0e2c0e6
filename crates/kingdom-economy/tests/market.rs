//! Market, market-maker, treasury, and transfer scenarios against a live
//! ledger.

#![allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]

use std::sync::Arc;

use chrono::Utc;
use kingdom_economy::{
    Accounts, BuffProvider, EconomyError, GameCalendar, Market, MarketConfig, MarketMakerConfig,
    MarketMakers, NoBuffs, PresenceProvider, StaticBuffs, Treasury,
};
use kingdom_ledger::conservation::{account_balance, verify_conservation};
use kingdom_ledger::{Ledger, RowKey};
use kingdom_types::{
    Account, Asset, BuildingBuffs, Coord, EntryKind, ErrorKind, Item, PlayerId, Resource,
    Settlement, SettlementId, Tool,
};
use kingdom_world::SettlementRules;

struct Online(u32);

impl PresenceProvider for Online {
    fn online_in(&self, _settlement: SettlementId) -> u32 {
        self.0
    }
}

async fn town(ledger: &Ledger, name: &str, edit: impl Fn(&mut Settlement)) -> SettlementId {
    let mut s = SettlementRules::default().blank(SettlementId::new(), name, Utc::now());
    s.coord = Some(Coord::new(10, 10));
    edit(&mut s);
    let id = s.id;
    ledger
        .transact(
            [RowKey::settlement_name(name), RowKey::Settlement(id)],
            |tx| tx.insert_settlement(s.clone()),
        )
        .await
        .unwrap();
    id
}

async fn player(
    ledger: &Arc<Ledger>,
    settlement: SettlementId,
    gold: u64,
    goods: &[(Resource, u64)],
) -> PlayerId {
    let id = PlayerId::new();
    Accounts::new(Arc::clone(ledger))
        .open_account(id, "trader", settlement, gold)
        .await
        .unwrap();
    let goods = goods.to_vec();
    ledger
        .transact([RowKey::Player(id)], |tx| {
            for (resource, qty) in &goods {
                tx.give_resource(id, *resource, *qty, Account::World, EntryKind::Grant)?;
            }
            Ok::<_, kingdom_ledger::LedgerError>(())
        })
        .await
        .unwrap();
    id
}

fn market(ledger: &Arc<Ledger>, buffs: Arc<dyn BuffProvider>) -> Market {
    Market::new(
        Arc::clone(ledger),
        MarketConfig::default(),
        GameCalendar::new(MarketMakerConfig::default().day_length),
        buffs,
    )
}

#[tokio::test]
async fn small_sale_is_untaxed() {
    let ledger = Arc::new(Ledger::new());
    let t = town(&ledger, "Mill", |s| {
        s.prices.insert(Resource::Wood, 1);
        s.tax_rate = 10;
        s.tax_free_up_to = 10;
    })
    .await;
    let seller = player(&ledger, t, 0, &[(Resource::Wood, 5)]).await;

    let receipt = market(&ledger, Arc::new(NoBuffs))
        .sell(seller, Resource::Wood, 5, Utc::now())
        .await
        .unwrap();
    assert_eq!(receipt.treasury_qty, 0);
    assert_eq!(receipt.market_net, 5);
    assert_eq!(receipt.total_paid(), 5);
    assert_eq!(ledger.stock(t, Resource::Wood).await, 5);
    let account = ledger.player(seller).await.unwrap();
    assert_eq!(account.gold, 5);
    assert_eq!(account.holding(Resource::Wood), 0);
}

#[tokio::test]
async fn treasury_floor_buys_first() {
    let ledger = Arc::new(Ledger::new());
    let t = town(&ledger, "Quarry", |s| {
        s.prices.insert(Resource::Wood, 1);
        s.floors.insert(Resource::Wood, 2);
        s.quotas.insert(Resource::Wood, 3);
        s.treasury = 100;
        s.tax_rate = 10;
        s.tax_free_up_to = 10;
    })
    .await;
    let seller = player(&ledger, t, 0, &[(Resource::Wood, 10)]).await;

    let receipt = market(&ledger, Arc::new(NoBuffs))
        .sell(seller, Resource::Wood, 10, Utc::now())
        .await
        .unwrap();
    assert_eq!(receipt.treasury_qty, 3);
    assert_eq!(receipt.treasury_paid, 6);
    assert_eq!(receipt.market_qty, 7);
    assert_eq!(receipt.market_gross, 7);
    assert_eq!(receipt.market_net, 7);
    assert_eq!(ledger.player(seller).await.unwrap().gold, 13);

    let town = ledger.settlement(t).await.unwrap();
    assert_eq!(town.treasury, 94);
    assert_eq!(town.quota_remaining(Resource::Wood), 0);
    assert_eq!(ledger.stock(t, Resource::Wood).await, 10);
}

#[tokio::test]
async fn treasury_never_pays_more_than_it_holds() {
    let ledger = Arc::new(Ledger::new());
    let t = town(&ledger, "Poor", |s| {
        s.prices.insert(Resource::Stone, 3);
        s.floors.insert(Resource::Stone, 3);
        s.quotas.insert(Resource::Stone, 50);
        s.treasury = 7;
    })
    .await;
    let seller = player(&ledger, t, 0, &[(Resource::Stone, 4)]).await;

    let receipt = market(&ledger, Arc::new(NoBuffs))
        .sell(seller, Resource::Stone, 4, Utc::now())
        .await
        .unwrap();
    assert_eq!(receipt.treasury_qty, 2);
    assert_eq!(receipt.treasury_paid, 6);
    assert_eq!(ledger.settlement(t).await.unwrap().treasury, 1);
}

#[tokio::test]
async fn large_sales_are_taxed() {
    let ledger = Arc::new(Ledger::new());
    let t = town(&ledger, "Port", |s| {
        s.prices.insert(Resource::Meat, 3);
        s.tax_rate = 12;
    })
    .await;
    let seller = player(&ledger, t, 0, &[(Resource::Meat, 10)]).await;

    let receipt = market(&ledger, Arc::new(NoBuffs))
        .sell(seller, Resource::Meat, 10, Utc::now())
        .await
        .unwrap();
    assert_eq!(receipt.market_gross, 30);
    assert_eq!(receipt.market_net, 26);
}

#[tokio::test]
async fn selling_more_than_held_changes_nothing() {
    let ledger = Arc::new(Ledger::new());
    let t = town(&ledger, "Ford", |_| {}).await;
    let seller = player(&ledger, t, 0, &[(Resource::Fruit, 2)]).await;
    let before = ledger.journal_len().await;

    let err = market(&ledger, Arc::new(NoBuffs))
        .sell(seller, Resource::Fruit, 3, Utc::now())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientQuantity);
    assert_eq!(ledger.player(seller).await.unwrap().holding(Resource::Fruit), 2);
    assert_eq!(ledger.journal_len().await, before);
}

#[tokio::test]
async fn over_buying_is_rejected_atomically() {
    let ledger = Arc::new(Ledger::new());
    let t = town(&ledger, "Keep", |s| {
        s.prices.insert(Resource::Stone, 2);
    })
    .await;
    let seller = player(&ledger, t, 0, &[(Resource::Stone, 4)]).await;
    let buyer = player(&ledger, t, 100, &[]).await;
    let market = market(&ledger, Arc::new(NoBuffs));
    market.sell(seller, Resource::Stone, 4, Utc::now()).await.unwrap();

    let err = market
        .buy(buyer, Item::Resource(Resource::Stone), Some(5), Utc::now())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientStock);
    assert_eq!(ledger.stock(t, Resource::Stone).await, 4);
    assert_eq!(ledger.player(buyer).await.unwrap().gold, 100);

    let receipt = market
        .buy(buyer, Item::Resource(Resource::Stone), Some(4), Utc::now())
        .await
        .unwrap();
    assert_eq!(receipt.cost, 8);
    assert_eq!(receipt.new_stock, Some(0));
    let account = ledger.player(buyer).await.unwrap();
    assert_eq!(account.gold, 92);
    assert_eq!(account.holding(Resource::Stone), 4);
}

#[tokio::test]
async fn purchases_need_gold() {
    let ledger = Arc::new(Ledger::new());
    let t = town(&ledger, "Dell", |s| {
        s.prices.insert(Resource::Meat, 3);
        s.tax_rate = 10;
    })
    .await;
    let seller = player(&ledger, t, 0, &[(Resource::Meat, 20)]).await;
    let buyer = player(&ledger, t, 20, &[]).await;
    let market = market(&ledger, Arc::new(NoBuffs));
    market.sell(seller, Resource::Meat, 20, Utc::now()).await.unwrap();

    // 7 meat is 21 gross, 23 after the 10% markup.
    let err = market
        .buy(buyer, Item::Resource(Resource::Meat), Some(7), Utc::now())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientFunds);
    assert_eq!(ledger.stock(t, Resource::Meat).await, 20);
}

#[tokio::test]
async fn tools_use_the_building_discount() {
    let ledger = Arc::new(Ledger::new());
    let t = town(&ledger, "Forge", |s| {
        s.tax_rate = 10;
    })
    .await;
    let buffs = StaticBuffs::new().with(
        t,
        BuildingBuffs {
            tool_discount_percent: 80,
            tax_free_up_to: 15,
            ..BuildingBuffs::default()
        },
    );
    let buyer = player(&ledger, t, 100, &[]).await;
    let market = market(&ledger, Arc::new(buffs));

    // Pickaxe 25 at the 50% cap is 13, within the buffed tax-free threshold.
    let one = market
        .buy(buyer, Item::Tool(Tool::Pickaxe), None, Utc::now())
        .await
        .unwrap();
    assert_eq!(one.cost, 13);
    assert_eq!(one.new_stock, None);

    // Two bows are 20 gross, over the threshold, so 22 with tax.
    let two = market
        .buy(buyer, Item::Tool(Tool::Bow), Some(2), Utc::now())
        .await
        .unwrap();
    assert_eq!(two.cost, 22);
    let account = ledger.player(buyer).await.unwrap();
    assert_eq!(account.gold, 65);
    assert_eq!(account.tool_count(Tool::Bow), 2);
    assert_eq!(account.tool_count(Tool::Pickaxe), 1);
}

#[tokio::test]
async fn stake_threshold_tracks_population() {
    let ledger = Arc::new(Ledger::new());
    let t = town(&ledger, "Cross", |_| {}).await;
    let makers = MarketMakers::new(
        Arc::clone(&ledger),
        MarketMakerConfig::default(),
        Arc::new(Online(4)),
    );
    let exact = player(&ledger, t, 0, &[(Resource::Wood, 70)]).await;
    let short = player(&ledger, t, 0, &[(Resource::Stone, 69)]).await;

    let err = makers
        .claim(short, t, Resource::Stone, Utc::now())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientQuantity);
    assert_eq!(ledger.player(short).await.unwrap().holding(Resource::Stone), 69);

    let receipt = makers.claim(exact, t, Resource::Wood, Utc::now()).await.unwrap();
    assert_eq!(receipt.staked, 70);
    assert_eq!(receipt.percent, 10);
    assert_eq!(ledger.player(exact).await.unwrap().holding(Resource::Wood), 0);

    let rival = player(&ledger, t, 0, &[(Resource::Wood, 100)]).await;
    let err = makers.claim(rival, t, Resource::Wood, Utc::now()).await.unwrap_err();
    assert!(matches!(err, EconomyError::StakeTaken { .. }));

    let board = makers.status(t, Utc::now()).await;
    assert_eq!(board.stakes.len(), 1);
    assert_eq!(board.stakes[0].holder, exact);
    assert_eq!(board.stakes[0].holder_name.as_deref(), Some("trader"));
    assert!(board.remaining_ms <= makers.calendar().day_ms());
}

#[tokio::test]
async fn stakes_must_be_claimed_on_site() {
    let ledger = Arc::new(Ledger::new());
    let here = town(&ledger, "Here", |_| {}).await;
    let there = town(&ledger, "There", |_| {}).await;
    let makers = MarketMakers::new(
        Arc::clone(&ledger),
        MarketMakerConfig::default(),
        Arc::new(Online(0)),
    );
    let p = player(&ledger, here, 0, &[(Resource::Meat, 200)]).await;
    let err = makers.claim(p, there, Resource::Meat, Utc::now()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WrongLocation);
}

#[tokio::test]
async fn stake_holder_earns_commission_from_the_market() {
    let ledger = Arc::new(Ledger::new());
    let t = town(&ledger, "Bazaar", |s| {
        s.prices.insert(Resource::Wood, 2);
        s.tax_rate = 10;
    })
    .await;
    let makers = MarketMakers::new(
        Arc::clone(&ledger),
        MarketMakerConfig::default(),
        Arc::new(Online(0)),
    );
    let maker = player(&ledger, t, 0, &[(Resource::Wood, 50)]).await;
    makers.claim(maker, t, Resource::Wood, Utc::now()).await.unwrap();

    let seller = player(&ledger, t, 0, &[(Resource::Wood, 20)]).await;
    let market = market(&ledger, Arc::new(NoBuffs));
    let receipt = market.sell(seller, Resource::Wood, 20, Utc::now()).await.unwrap();
    assert_eq!(receipt.market_gross, 40);
    assert_eq!(receipt.market_net, 36);
    assert_eq!(receipt.commission, 4);
    assert_eq!(ledger.player(maker).await.unwrap().gold, 4);
    assert_eq!(ledger.player(seller).await.unwrap().gold, 36);

    let buyer = player(&ledger, t, 100, &[]).await;
    market
        .buy(buyer, Item::Resource(Resource::Wood), Some(10), Utc::now())
        .await
        .unwrap();
    assert_eq!(ledger.player(maker).await.unwrap().gold, 6);
}

#[tokio::test]
async fn past_stakes_lapse() {
    let ledger = Arc::new(Ledger::new());
    let t = town(&ledger, "Old", |_| {}).await;
    let makers = MarketMakers::new(
        Arc::clone(&ledger),
        MarketMakerConfig::default(),
        Arc::new(Online(0)),
    );
    let p = player(&ledger, t, 0, &[(Resource::Fruit, 50)]).await;
    let now = Utc::now();
    makers.claim(p, t, Resource::Fruit, now).await.unwrap();

    let today = makers.calendar().day_of(now);
    assert_eq!(makers.lapse(today).await.unwrap(), 0);
    let tomorrow = kingdom_types::GameDay(today.0 + 1);
    assert_eq!(makers.lapse(tomorrow).await.unwrap(), 1);
    assert!(makers.status(t, now).await.stakes.is_empty());
}

#[tokio::test]
async fn trading_conserves_gold_through_the_journal() {
    let ledger = Arc::new(Ledger::new());
    let t = town(&ledger, "Ledgerton", |s| {
        s.prices.insert(Resource::Wood, 2);
        s.floors.insert(Resource::Wood, 1);
        s.quotas.insert(Resource::Wood, 5);
        s.treasury = 50;
        s.tax_rate = 20;
    })
    .await;
    let seller = player(&ledger, t, 0, &[(Resource::Wood, 30)]).await;
    let buyer = player(&ledger, t, 200, &[]).await;
    let market = market(&ledger, Arc::new(NoBuffs));
    market.sell(seller, Resource::Wood, 30, Utc::now()).await.unwrap();
    market
        .buy(buyer, Item::Resource(Resource::Wood), Some(12), Utc::now())
        .await
        .unwrap();

    let journal = ledger.journal().await;
    assert!(verify_conservation(&journal).is_balanced());

    let seller_gold = ledger.player(seller).await.unwrap().gold;
    let buyer_gold = ledger.player(buyer).await.unwrap().gold;
    let treasury = ledger.settlement(t).await.unwrap().treasury;
    assert_eq!(account_balance(&journal, Account::Player(seller), Asset::Gold), i128::from(seller_gold));
    assert_eq!(account_balance(&journal, Account::Player(buyer), Asset::Gold), i128::from(buyer_gold));

    // Everything the players and treasury gained net came from the market.
    let market_flow = account_balance(&journal, Account::Market(t), Asset::Gold);
    let tracked = i128::from(seller_gold) + i128::from(buyer_gold) + i128::from(treasury);
    assert_eq!(tracked - 250, -market_flow);
    assert_eq!(ledger.stock(t, Resource::Wood).await, 18);
}

#[tokio::test]
async fn owners_manage_their_treasury() {
    let ledger = Arc::new(Ledger::new());
    let owner = PlayerId::new();
    let t = town(&ledger, "Manor", |s| {
        s.owner = Some(owner);
        s.prices.insert(Resource::Stone, 4);
    })
    .await;
    Accounts::new(Arc::clone(&ledger))
        .open_account(owner, "lord", t, 80)
        .await
        .unwrap();
    let stranger = player(&ledger, t, 80, &[]).await;
    let treasury = Treasury::new(Arc::clone(&ledger), MarketConfig::default());

    let err = treasury.set_tax_rate(stranger, t, 5).await.unwrap_err();
    assert!(matches!(err, EconomyError::NotOwner { .. }));
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert!(treasury.fund(stranger, 10).await.is_err());

    let funded = treasury.fund(owner, 30).await.unwrap();
    assert_eq!(funded.treasury, 30);
    assert_eq!(ledger.player(owner).await.unwrap().gold, 50);

    let err = treasury.set_floor(owner, t, Resource::Stone, 5).await.unwrap_err();
    assert!(matches!(err, EconomyError::FloorAboveMarket { price: 4, .. }));
    treasury.set_floor(owner, t, Resource::Stone, 4).await.unwrap();

    let err = treasury
        .set_daily_quota(owner, t, Resource::Stone, 2001)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    treasury.set_daily_quota(owner, t, Resource::Stone, 2000).await.unwrap();

    assert!(treasury.set_tax_rate(owner, t, 101).await.is_err());
    let s = treasury.set_tax_rate(owner, t, 100).await.unwrap();
    assert_eq!(s.tax_rate, 100);

    let s = treasury
        .set_price(owner, t, Item::Resource(Resource::Stone), 2)
        .await
        .unwrap();
    assert_eq!(s.floor(Resource::Stone), 2);
    let s = treasury.set_price(owner, t, Item::Tool(Tool::Bow), 40).await.unwrap();
    assert_eq!(s.tool_price(Tool::Bow), 40);
}

#[tokio::test]
async fn quotas_refill_each_day() {
    let ledger = Arc::new(Ledger::new());
    let t = town(&ledger, "Granary", |s| {
        s.prices.insert(Resource::Fruit, 1);
        s.floors.insert(Resource::Fruit, 1);
        s.daily_quotas.insert(Resource::Fruit, 5);
        s.quotas.insert(Resource::Fruit, 5);
        s.treasury = 100;
    })
    .await;
    let seller = player(&ledger, t, 0, &[(Resource::Fruit, 5)]).await;
    market(&ledger, Arc::new(NoBuffs))
        .sell(seller, Resource::Fruit, 5, Utc::now())
        .await
        .unwrap();
    assert_eq!(ledger.settlement(t).await.unwrap().quota_remaining(Resource::Fruit), 0);

    let treasury = Treasury::new(Arc::clone(&ledger), MarketConfig::default());
    assert_eq!(treasury.restore_quotas().await.unwrap(), 1);
    assert_eq!(ledger.settlement(t).await.unwrap().quota_remaining(Resource::Fruit), 5);
    assert_eq!(treasury.restore_quotas().await.unwrap(), 0);
}

#[tokio::test]
async fn peers_trade_only_face_to_face() {
    let ledger = Arc::new(Ledger::new());
    let a = town(&ledger, "Alpha", |_| {}).await;
    let b = town(&ledger, "Beta", |_| {}).await;
    let ada = player(&ledger, a, 10, &[(Resource::Meat, 3)]).await;
    let bo = player(&ledger, a, 0, &[]).await;
    let cy = player(&ledger, b, 0, &[]).await;
    let accounts = Accounts::new(Arc::clone(&ledger));

    assert!(matches!(accounts.pay(ada, ada, 1).await, Err(EconomyError::SelfTarget)));
    let err = accounts.pay(ada, cy, 1).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WrongLocation);
    let err = accounts.pay(ada, bo, 11).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientFunds);

    accounts.pay(ada, bo, 4).await.unwrap();
    accounts.give(ada, bo, Resource::Meat, 3).await.unwrap();
    let err = accounts.give(ada, bo, Resource::Meat, 1).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientQuantity);

    let bo_account = accounts.account(bo).await.unwrap();
    assert_eq!(bo_account.gold, 4);
    assert_eq!(bo_account.holding(Resource::Meat), 3);

    accounts.relocate(cy, a).await.unwrap();
    accounts.pay(bo, cy, 4).await.unwrap();
    assert_eq!(accounts.account(cy).await.unwrap().gold, 4);
}

#[tokio::test]
async fn opening_an_account_twice_keeps_the_first() {
    let ledger = Arc::new(Ledger::new());
    let t = town(&ledger, "Gate", |_| {}).await;
    let accounts = Accounts::new(Arc::clone(&ledger));
    let id = PlayerId::new();
    accounts.open_account(id, "ada", t, 25).await.unwrap();
    let again = accounts.open_account(id, "ada", t, 25).await.unwrap();
    assert_eq!(again.gold, 25);
    assert_eq!(ledger.journal_len().await, 1);

    let err = accounts
        .open_account(PlayerId::new(), "bo", SettlementId::new(), 0)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
