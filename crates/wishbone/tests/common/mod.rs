//! Test feature shared by the integration tests.
//!
//! Every wish variant maps to a known number of effects so tests can count
//! state emissions exactly.

#![allow(dead_code)]

use std::time::Duration;

use wishbone::{
    effects, Actor, EffectStream, Observation, Reducer, Store, StoreBuilder, StoreConfig,
    StreamExt, WishSubject,
};
use wishbone_testing::{Observer, Recorder};

pub const INITIAL_COUNTER: i32 = 100;
pub const INITIAL_LOADING: bool = false;
pub const INSTANT_FULFILL_AMOUNT: i32 = 2;
pub const DELAYED_FULFILL_AMOUNT: i32 = 5;
pub const CONDITIONAL_MULTIPLIER: i32 = 10;
pub const MOCK_SERVER_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq)]
pub struct TestState {
    pub id: String,
    pub counter: i32,
    pub loading: bool,
}

impl Default for TestState {
    fn default() -> Self {
        Self {
            id: "initial".to_string(),
            counter: INITIAL_COUNTER,
            loading: INITIAL_LOADING,
        }
    }
}

pub fn loopback_initial_state() -> TestState {
    TestState {
        id: "loopback initial state".to_string(),
        ..TestState::default()
    }
}

pub fn loopback_state(n: u8) -> TestState {
    TestState {
        id: format!("loopback state {n}"),
        ..TestState::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TestWish {
    Unfulfillable,
    FulfillableInstantly,
    FulfillableAsync,
    TranslatesTo3Effects,
    MaybeFulfillable,
    LoopbackInitial,
    Loopback1,
    Loopback2,
    Loopback3,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TestEffect {
    StartedAsync,
    FinishedAsync(i32),
    Instant(i32),
    Multiple(u8),
    ConditionalThingHappened(i32),
    LoopbackInitial,
    Loopback(u8),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TestNews {
    ConditionalThingHappened,
    Loopback1,
}

/// Logs every invocation together with the state it was handed.
pub struct TestActor {
    pub invocations: Recorder<(TestWish, TestState)>,
}

impl Actor<TestWish, TestState, TestEffect> for TestActor {
    fn invoke(&self, wish: TestWish, state: &TestState) -> EffectStream<TestEffect> {
        self.invocations.record((wish.clone(), state.clone()));

        match wish {
            TestWish::Unfulfillable => effects![],
            TestWish::FulfillableInstantly => effects![TestEffect::Instant(INSTANT_FULFILL_AMOUNT)],
            TestWish::FulfillableAsync if state.loading => effects![],
            TestWish::FulfillableAsync => effects::just(TestEffect::StartedAsync)
                .chain(effects::later(async {
                    tokio::time::sleep(MOCK_SERVER_DELAY).await;
                    TestEffect::FinishedAsync(DELAYED_FULFILL_AMOUNT)
                }))
                .boxed(),
            TestWish::TranslatesTo3Effects => effects![
                TestEffect::Multiple(1),
                TestEffect::Multiple(2),
                TestEffect::Multiple(3),
            ],
            TestWish::MaybeFulfillable if state.counter % 3 == 0 => {
                effects![TestEffect::ConditionalThingHappened(CONDITIONAL_MULTIPLIER)]
            }
            TestWish::MaybeFulfillable => effects![],
            TestWish::LoopbackInitial => effects![TestEffect::LoopbackInitial],
            TestWish::Loopback1 => effects![TestEffect::Loopback(1)],
            TestWish::Loopback2 => effects![TestEffect::Loopback(2)],
            TestWish::Loopback3 => effects![TestEffect::Loopback(3)],
        }
    }
}

pub struct TestReducer;

impl Reducer<TestState, TestEffect> for TestReducer {
    fn reduce(&self, state: &TestState, effect: &TestEffect) -> TestState {
        match effect {
            TestEffect::StartedAsync => TestState {
                loading: true,
                ..state.clone()
            },
            TestEffect::FinishedAsync(amount) => TestState {
                counter: state.counter + amount,
                loading: false,
                ..state.clone()
            },
            TestEffect::Instant(amount) => TestState {
                counter: state.counter + amount,
                ..state.clone()
            },
            TestEffect::Multiple(_) => state.clone(),
            TestEffect::ConditionalThingHappened(multiplier) => TestState {
                counter: state.counter * multiplier,
                ..state.clone()
            },
            TestEffect::LoopbackInitial => loopback_initial_state(),
            TestEffect::Loopback(n) => loopback_state(*n),
        }
    }
}

pub fn test_news(effect: &TestEffect, _before: &TestState, _after: &TestState) -> Option<TestNews> {
    match effect {
        TestEffect::ConditionalThingHappened(_) => Some(TestNews::ConditionalThingHappened),
        TestEffect::Loopback(1) => Some(TestNews::Loopback1),
        _ => None,
    }
}

pub fn test_store(
    config: StoreConfig,
    invocations: Recorder<(TestWish, TestState)>,
) -> Store<TestState, TestWish, TestNews> {
    StoreBuilder::new(TestState::default())
        .config(config)
        .actor(TestActor { invocations })
        .reducer(TestReducer)
        .news_publisher(test_news)
        .build()
        .expect("test store wiring is valid")
}

/// A store with one connected source and observers attached from the start.
pub struct Harness {
    pub store: Store<TestState, TestWish, TestNews>,
    pub wishes: WishSubject<TestWish>,
    pub states: Observer<TestState>,
    pub news: Observer<TestNews>,
    pub invocations: Recorder<(TestWish, TestState)>,
}

impl Harness {
    pub fn new() -> Self {
        wishbone_testing::init_tracing();

        let invocations = Recorder::new();
        let store = test_store(StoreConfig::named("engine-test"), invocations.clone());
        let wishes = WishSubject::new();
        store.connect_source(&wishes).expect("store is live");

        let news = Observer::new(store.observe_news());
        let states = Observer::new(store.observe_state());
        Self {
            store,
            wishes,
            states,
            news,
            invocations,
        }
    }

    pub fn emit_all(&self, wishes: &[TestWish]) {
        for wish in wishes {
            self.wishes.emit(wish.clone());
        }
    }

    pub fn news_stream(&self) -> Observation<TestNews> {
        self.store.observe_news()
    }
}
