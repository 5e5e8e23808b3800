use crate::{
    errors::{Result, TradeError},
    gateway::{ExchangeGateway, GatewayConnector},
    models::{
        ClosedOrder, ConditionalKind, ConditionalOrder, ConditionalOrderRequest, Credential,
        MarginMode, MarketFill, MarketKind, MarketLimits, OrderSide, OrderState,
    },
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

#[derive(Debug, Clone, PartialEq)]
pub struct PlacedMarketOrder {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub reduce_only: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlacedConditionalOrder {
    pub order_id: String,
    pub request: ConditionalOrderRequest,
}

struct MockState {
    next_id: u64,
    default_price: Decimal,
    prices: HashMap<String, Decimal>,
    balances: HashMap<String, Decimal>,
    limits: MarketLimits,
    fill_fee: Decimal,
    fill_fee_currency: Option<String>,
    order_states: HashMap<String, OrderState>,
    failing_status: HashSet<String>,
    closed_orders: Vec<ClosedOrder>,
    status_queries: HashMap<String, u32>,
    market_orders: Vec<PlacedMarketOrder>,
    conditional_orders: Vec<PlacedConditionalOrder>,
    cancelled: Vec<String>,
    rejected_kinds: HashSet<ConditionalKind>,
    market_failures: u32,
    delay: Option<Duration>,
    margin_modes: Vec<(String, MarginMode)>,
    leverages: Vec<(String, u32)>,
}

/// 可编排的内存交易所
pub struct MockGateway {
    state: Mutex<MockState>,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGateway {
    pub fn new() -> Self {
        let mut balances = HashMap::new();
        balances.insert("USDT".to_string(), dec!(1000));
        Self {
            state: Mutex::new(MockState {
                next_id: 0,
                default_price: dec!(100),
                prices: HashMap::new(),
                balances,
                limits: MarketLimits {
                    min_quantity: dec!(0.001),
                    min_notional: dec!(5),
                    price_precision: 2,
                    quantity_precision: 3,
                },
                fill_fee: Decimal::ZERO,
                fill_fee_currency: None,
                order_states: HashMap::new(),
                failing_status: HashSet::new(),
                closed_orders: Vec::new(),
                status_queries: HashMap::new(),
                market_orders: Vec::new(),
                conditional_orders: Vec::new(),
                cancelled: Vec::new(),
                rejected_kinds: HashSet::new(),
                market_failures: 0,
                delay: None,
                margin_modes: Vec::new(),
                leverages: Vec::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    fn next_order_id(state: &mut MockState) -> String {
        state.next_id += 1;
        format!("mock-{}", state.next_id)
    }

    async fn pause(&self) {
        let delay = self.state().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.state().prices.insert(symbol.to_string(), price);
    }

    pub fn set_balance(&self, asset: &str, amount: Decimal) {
        self.state().balances.insert(asset.to_string(), amount);
    }

    pub fn set_limits(&self, limits: MarketLimits) {
        self.state().limits = limits;
    }

    /// 之后的市价单按该手续费成交
    pub fn set_fill_fee(&self, fee: Decimal, currency: Option<&str>) {
        let mut state = self.state();
        state.fill_fee = fee;
        state.fill_fee_currency = currency.map(|c| c.to_string());
    }

    pub fn fill_order(&self, order_id: &str, avg_price: Decimal, fee: Decimal) {
        self.state().order_states.insert(
            order_id.to_string(),
            OrderState {
                filled: true,
                avg_price: Some(avg_price),
                fee,
            },
        );
    }

    /// 交易所报告已成交但未返回均价
    pub fn fill_order_unpriced(&self, order_id: &str) {
        self.state().order_states.insert(
            order_id.to_string(),
            OrderState {
                filled: true,
                avg_price: None,
                fee: Decimal::ZERO,
            },
        );
    }

    pub fn fail_status_queries(&self, order_id: &str) {
        self.state().failing_status.insert(order_id.to_string());
    }

    pub fn restore_status_queries(&self, order_id: &str) {
        self.state().failing_status.remove(order_id);
    }

    pub fn add_closed_order(&self, order: ClosedOrder) {
        self.state().closed_orders.push(order);
    }

    pub fn reject_conditional(&self, kind: ConditionalKind) {
        self.state().rejected_kinds.insert(kind);
    }

    /// 接下来 n 笔市价单返回临时性错误
    pub fn fail_next_market_orders(&self, n: u32) {
        self.state().market_failures = n;
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state().delay = Some(delay);
    }

    pub fn status_query_count(&self, order_id: &str) -> u32 {
        self.state()
            .status_queries
            .get(order_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn market_orders(&self) -> Vec<PlacedMarketOrder> {
        self.state().market_orders.clone()
    }

    pub fn conditional_orders(&self) -> Vec<PlacedConditionalOrder> {
        self.state().conditional_orders.clone()
    }

    pub fn conditional_orders_of(&self, kind: ConditionalKind) -> Vec<PlacedConditionalOrder> {
        self.conditional_orders()
            .into_iter()
            .filter(|order| order.request.kind == kind)
            .collect()
    }

    pub fn cancelled_orders(&self) -> Vec<String> {
        self.state().cancelled.clone()
    }

    pub fn remote_order_count(&self) -> usize {
        let state = self.state();
        state.market_orders.len() + state.conditional_orders.len()
    }

    pub fn margin_modes(&self) -> Vec<(String, MarginMode)> {
        self.state().margin_modes.clone()
    }

    pub fn leverages(&self) -> Vec<(String, u32)> {
        self.state().leverages.clone()
    }
}

#[async_trait]
impl ExchangeGateway for MockGateway {
    async fn get_balance(&self) -> Result<HashMap<String, Decimal>> {
        self.pause().await;
        Ok(self.state().balances.clone())
    }

    async fn get_last_price(&self, symbol: &str) -> Result<Decimal> {
        let state = self.state();
        Ok(state
            .prices
            .get(symbol)
            .copied()
            .unwrap_or(state.default_price))
    }

    async fn get_market_limits(&self, _symbol: &str) -> Result<MarketLimits> {
        Ok(self.state().limits.clone())
    }

    async fn set_margin_mode(&self, symbol: &str, mode: MarginMode) -> Result<()> {
        self.state().margin_modes.push((symbol.to_string(), mode));
        Ok(())
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        self.state().leverages.push((symbol.to_string(), leverage));
        Ok(())
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        reduce_only: bool,
    ) -> Result<MarketFill> {
        self.pause().await;
        let mut state = self.state();
        if state.market_failures > 0 {
            state.market_failures -= 1;
            return Err(TradeError::gateway("mock timeout"));
        }
        let order_id = Self::next_order_id(&mut state);
        let avg_price = state
            .prices
            .get(symbol)
            .copied()
            .unwrap_or(state.default_price);
        let fee_currency = state.fill_fee_currency.clone().unwrap_or_else(|| "USDT".to_string());
        state.market_orders.push(PlacedMarketOrder {
            order_id: order_id.clone(),
            symbol: symbol.to_string(),
            side,
            quantity,
            reduce_only,
        });
        Ok(MarketFill {
            order_id,
            avg_price,
            quantity,
            fee: state.fill_fee,
            fee_currency,
        })
    }

    async fn place_conditional_order(
        &self,
        req: &ConditionalOrderRequest,
    ) -> Result<ConditionalOrder> {
        let mut state = self.state();
        if state.rejected_kinds.contains(&req.kind) {
            return Err(TradeError::GatewayRejected {
                message: format!("mock rejects {:?} orders", req.kind),
            });
        }
        let order_id = Self::next_order_id(&mut state);
        state.conditional_orders.push(PlacedConditionalOrder {
            order_id: order_id.clone(),
            request: req.clone(),
        });
        Ok(ConditionalOrder {
            order_id,
            trigger_price: req.trigger_price,
        })
    }

    async fn get_order_status(&self, order_id: &str, _symbol: &str) -> Result<OrderState> {
        let mut state = self.state();
        *state.status_queries.entry(order_id.to_string()).or_insert(0) += 1;
        if state.failing_status.contains(order_id) {
            return Err(TradeError::gateway(format!("mock status timeout for {}", order_id)));
        }
        Ok(state.order_states.get(order_id).cloned().unwrap_or(OrderState {
            filled: false,
            avg_price: None,
            fee: Decimal::ZERO,
        }))
    }

    async fn cancel_order(&self, order_id: &str, _symbol: &str) -> Result<()> {
        self.state().cancelled.push(order_id.to_string());
        Ok(())
    }

    async fn list_recent_closed_orders(
        &self,
        _symbol: &str,
        since: u64,
    ) -> Result<Vec<ClosedOrder>> {
        Ok(self
            .state()
            .closed_orders
            .iter()
            .filter(|order| order.timestamp >= since)
            .cloned()
            .collect())
    }
}

/// 所有用户与市场共用同一个 MockGateway
pub struct MockConnector {
    pub gateway: Arc<MockGateway>,
}

#[async_trait]
impl GatewayConnector for MockConnector {
    async fn connect(
        &self,
        _market: MarketKind,
        _credential: &Credential,
    ) -> Result<Arc<dyn ExchangeGateway>> {
        Ok(self.gateway.clone())
    }
}
