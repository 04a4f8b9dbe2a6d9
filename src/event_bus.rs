//! 事件总线系统，用于解耦模块间通信
//!
//! 该系统提供发布-订阅机制，允许各子系统（音频、灯光、UI）：
//! - 按事件名注册/注销监听器
//! - 同步接收事件，按注册顺序调用
//! - 在处理器内部安全地再次发布事件（重入）
//!
//! 单个处理器的失败（返回 `Err` 或 panic）会被捕获并记录，不会影响其他处理器，
//! 也不会传播给发布者。分发时遍历的是处理器列表的快照，
//! 因此分发过程中新增/移除的处理器只在下一次发布时生效。

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::str::FromStr;
use strum_macros::{AsRefStr, Display, EnumString, IntoStaticStr};

pub use world::Payload;

/// 核心认识的事件名
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum EventName {
    // ===== 进度事件（状态存储会处理） =====
    KeyCollected,
    NoteRead,
    GeneratorStarted,
    PowerRestored,
    EntityEncounter,
    AreaEntered,

    // ===== 叙事事件 =====
    StoryTrigger,

    // ===== 交互事件 =====
    DoorUnlocked,
    DoorOpened,
    SwitchToggled,
    InteractionDenied,

    // ===== 环境事件 =====
    /// 追逐封锁：当前区域的门被封住
    AreaLocked,
    AreaUnlocked,

    // ===== 系统事件 =====
    SceneLoaded,
}

impl EventName {
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// 总线上传递的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    pub payload: Payload,
    /// 发布时的模拟时钟（毫秒）
    pub emitted_at_ms: u64,
    /// 全局发布序号
    pub sequence: u64,
}

impl Event {
    pub fn new(name: impl Into<String>, payload: Payload) -> Self {
        Event {
            name: name.into(),
            payload,
            emitted_at_ms: 0,
            sequence: 0,
        }
    }

    /// 若是核心认识的事件，返回对应的枚举
    pub fn known(&self) -> Option<EventName> {
        EventName::from_str(&self.name).ok()
    }

    pub fn is(&self, name: EventName) -> bool {
        self.name == name.as_str()
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(|v| v.as_str())
    }

    pub fn bool_field(&self, key: &str) -> Option<bool> {
        self.payload.get(key).and_then(|v| v.as_bool())
    }

    pub fn u64_field(&self, key: &str) -> Option<u64> {
        self.payload.get(key).and_then(|v| v.as_u64())
    }
}

/// 订阅句柄，用于注销
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle(u64);

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// 处理器在分发过程中可用的上下文
///
/// 通过它发布的事件会在当前处理器返回后立即、完整地处理（包括状态更新），
/// 然后才轮到下一个兄弟处理器。
#[derive(Debug)]
pub struct DispatchContext {
    current: SubscriptionHandle,
    emits: Vec<(String, Payload)>,
    unsubscribes: Vec<SubscriptionHandle>,
}

impl DispatchContext {
    fn new(current: SubscriptionHandle) -> Self {
        DispatchContext {
            current,
            emits: Vec::new(),
            unsubscribes: Vec::new(),
        }
    }

    /// 重入发布
    pub fn emit(&mut self, name: impl Into<String>, payload: Payload) {
        self.emits.push((name.into(), payload));
    }

    /// 注销任意订阅（下一次发布生效）
    pub fn unsubscribe(&mut self, handle: SubscriptionHandle) {
        self.unsubscribes.push(handle);
    }

    /// 注销当前处理器自身，常用于一次性监听
    pub fn unsubscribe_self(&mut self) {
        self.unsubscribes.push(self.current);
    }

    pub fn handle(&self) -> SubscriptionHandle {
        self.current
    }

    pub(crate) fn into_parts(self) -> (Vec<(String, Payload)>, Vec<SubscriptionHandle>) {
        (self.emits, self.unsubscribes)
    }
}

/// 事件处理器 trait
pub trait EventHandler {
    /// 处理事件；返回的错误会被总线记录并吞掉
    fn handle(&mut self, event: &Event, ctx: &mut DispatchContext) -> Result<()>;

    /// 处理器名称（用于日志）
    fn name(&self) -> &str;

    /// 是否应该处理此事件（事件过滤）
    fn should_handle(&self, _event: &Event) -> bool {
        true
    }
}

/// 事件生产者（触发器系统、交互解析器）看到的发布接口
pub trait EventSink {
    fn emit(&mut self, name: &str, payload: Payload);
}

/// 只收集不分发，便于单独测试生产者
impl EventSink for Vec<(String, Payload)> {
    fn emit(&mut self, name: &str, payload: Payload) {
        self.push((name.to_string(), payload));
    }
}

/// 基于闭包的处理器
pub struct FnHandler<F>
where
    F: FnMut(&Event, &mut DispatchContext) -> Result<()>,
{
    name: String,
    callback: F,
}

impl<F> FnHandler<F>
where
    F: FnMut(&Event, &mut DispatchContext) -> Result<()>,
{
    pub fn new(name: impl Into<String>, callback: F) -> Self {
        FnHandler {
            name: name.into(),
            callback,
        }
    }
}

impl<F> EventHandler for FnHandler<F>
where
    F: FnMut(&Event, &mut DispatchContext) -> Result<()>,
{
    fn handle(&mut self, event: &Event, ctx: &mut DispatchContext) -> Result<()> {
        (self.callback)(event, ctx)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 已注册的处理器；分发时克隆 `Rc` 形成快照
#[derive(Clone)]
pub struct Subscriber {
    handle: SubscriptionHandle,
    handler: Rc<RefCell<Box<dyn EventHandler>>>,
}

impl Subscriber {
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle
    }
}

/// 发布-订阅总线
///
/// 设计思路：
/// 1. 每个事件名一个有序处理器列表，另有一个接收所有事件的全局列表
/// 2. 分发基于快照，处理器可以在分发中途注销自己或其他处理器
/// 3. 处理器失败被隔离：记录日志、计数，继续下一个处理器
///
/// 总线本身不驱动分发循环：[`crate::narrative::Narrative`] 取快照、逐个
/// [`EventBus::deliver`]，并处理上下文里的重入发布。
pub struct EventBus {
    /// 注册的事件处理器（按事件名分组）
    handlers: HashMap<String, Vec<Subscriber>>,
    /// 全局事件处理器（处理所有事件）
    global_handlers: Vec<Subscriber>,
    next_handle: u64,
    /// 处理器失败次数（用于调试）
    failures: u64,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus {
            handlers: HashMap::new(),
            global_handlers: Vec::new(),
            next_handle: 0,
            failures: 0,
        }
    }

    fn allocate(&mut self, handler: Box<dyn EventHandler>) -> Subscriber {
        let handle = SubscriptionHandle(self.next_handle);
        self.next_handle += 1;
        Subscriber {
            handle,
            handler: Rc::new(RefCell::new(handler)),
        }
    }

    // ========== 订阅者 API ==========

    /// 注册事件处理器（处理特定名称的事件）
    pub fn subscribe(&mut self, event_name: impl Into<String>, handler: Box<dyn EventHandler>) -> SubscriptionHandle {
        let subscriber = self.allocate(handler);
        let handle = subscriber.handle;
        self.handlers.entry(event_name.into()).or_default().push(subscriber);
        handle
    }

    /// 用闭包注册处理器
    pub fn subscribe_fn<F>(&mut self, event_name: impl Into<String>, name: &str, callback: F) -> SubscriptionHandle
    where
        F: FnMut(&Event, &mut DispatchContext) -> Result<()> + 'static,
    {
        self.subscribe(event_name, Box::new(FnHandler::new(name, callback)))
    }

    /// 注册全局事件处理器（在特定名称的处理器之后调用）
    pub fn subscribe_all(&mut self, handler: Box<dyn EventHandler>) -> SubscriptionHandle {
        let subscriber = self.allocate(handler);
        let handle = subscriber.handle;
        self.global_handlers.push(subscriber);
        handle
    }

    /// 注销处理器；已注销时返回 false
    pub fn unsubscribe(&mut self, handle: SubscriptionHandle) -> bool {
        for list in self.handlers.values_mut() {
            if let Some(index) = list.iter().position(|s| s.handle == handle) {
                list.remove(index);
                return true;
            }
        }
        if let Some(index) = self.global_handlers.iter().position(|s| s.handle == handle) {
            self.global_handlers.remove(index);
            return true;
        }
        false
    }

    /// 当前对某事件名生效的处理器快照（特定处理器在前，全局处理器在后）
    pub fn subscribers_for(&self, event_name: &str) -> Vec<Subscriber> {
        let mut snapshot: Vec<Subscriber> = self.handlers.get(event_name).cloned().unwrap_or_default();
        snapshot.extend(self.global_handlers.iter().cloned());
        snapshot
    }

    /// 把事件交给单个处理器，隔离其失败
    pub fn deliver(&mut self, subscriber: &Subscriber, event: &Event) -> DispatchContext {
        let mut ctx = DispatchContext::new(subscriber.handle);

        let Ok(mut handler) = subscriber.handler.try_borrow_mut() else {
            tracing::warn!(event = %event.name, handler = %subscriber.handle, "handler is already dispatching, skipped");
            return ctx;
        };

        if !handler.should_handle(event) {
            return ctx;
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(event, &mut ctx)));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                self.failures += 1;
                tracing::warn!(event = %event.name, handler = handler.name(), error = %err, "event handler failed");
            }
            Err(panic) => {
                self.failures += 1;
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic".to_string());
                tracing::error!(event = %event.name, handler = handler.name(), panic = %message, "event handler panicked");
            }
        }
        ctx
    }

    // ========== 调试 API ==========

    /// 获取订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.global_handlers.len() + self.handlers.values().map(|v| v.len()).sum::<usize>()
    }

    /// 处理器失败（错误或 panic）的累计次数
    pub fn failure_count(&self) -> u64 {
        self.failures
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ========== 辅助宏 ==========

/// 创建一个简单的事件处理器类型的宏
///
/// # 示例
/// ```rust
/// # use nightward::{simple_handler, event_bus::{DispatchContext, Event, EventHandler}};
/// simple_handler!(StingerCue, "stinger_cue", |event, _ctx| {
///     if event.str_field("type") == Some("entity_aggressive") {
///         println!("play stinger 2");
///     }
///     Ok(())
/// });
/// ```
#[macro_export]
macro_rules! simple_handler {
    ($name:ident, $handler_name:expr, $closure:expr) => {
        pub struct $name {
            handler_fn: Box<dyn FnMut(&Event, &mut DispatchContext) -> anyhow::Result<()>>,
        }

        impl $name {
            pub fn new() -> Self {
                fn bind<F>(f: F) -> F
                where
                    F: FnMut(&Event, &mut DispatchContext) -> anyhow::Result<()>,
                {
                    f
                }
                Self {
                    handler_fn: Box::new(bind($closure)),
                }
            }
        }

        impl EventHandler for $name {
            fn handle(&mut self, event: &Event, ctx: &mut DispatchContext) -> anyhow::Result<()> {
                (self.handler_fn)(event, ctx)
            }

            fn name(&self) -> &str {
                $handler_name
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recorder(bus: &mut EventBus, event: &str, label: &'static str, log: &Rc<RefCell<Vec<String>>>) -> SubscriptionHandle {
        let log = Rc::clone(log);
        bus.subscribe_fn(event, label, move |e, _| {
            log.borrow_mut().push(format!("{}:{}", label, e.name));
            Ok(())
        })
    }

    /// 按快照顺序交给每个处理器，返回各自的上下文
    fn deliver_all(bus: &mut EventBus, event: &Event) -> Vec<DispatchContext> {
        bus.subscribers_for(&event.name)
            .iter()
            .map(|subscriber| bus.deliver(subscriber, event))
            .collect()
    }

    #[test]
    fn event_names_are_snake_case() {
        assert_eq!(EventName::KeyCollected.as_str(), "key_collected");
        assert_eq!(EventName::StoryTrigger.to_string(), "story_trigger");
        assert_eq!(EventName::AreaLocked.as_str(), "area_locked");
        assert_eq!(Event::new("area_entered", Payload::new()).known(), Some(EventName::AreaEntered));
        assert_eq!(Event::new("approaching_corridor", Payload::new()).known(), None);
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let mut bus = EventBus::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let first = recorder(&mut bus, "door_opened", "first", &log);
        let second = recorder(&mut bus, "door_opened", "second", &log);
        recorder(&mut bus, "note_read", "other", &log);

        let handles: Vec<_> = bus.subscribers_for("door_opened").iter().map(Subscriber::handle).collect();
        assert_eq!(handles, vec![first, second]);

        deliver_all(&mut bus, &Event::new("door_opened", Payload::new()));
        assert_eq!(*log.borrow(), vec!["first:door_opened", "second:door_opened"]);
    }

    #[test]
    fn unsubscribe_removes_exactly_one_and_is_idempotent() {
        let mut bus = EventBus::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let a = recorder(&mut bus, "x", "a", &log);
        recorder(&mut bus, "x", "b", &log);

        assert!(bus.unsubscribe(a));
        assert!(!bus.unsubscribe(a));
        deliver_all(&mut bus, &Event::new("x", Payload::new()));
        assert_eq!(*log.borrow(), vec!["b:x"]);
    }

    #[test]
    fn failing_and_panicking_handlers_are_isolated() {
        let mut bus = EventBus::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        bus.subscribe_fn("note_read", "broken", |_, _| anyhow::bail!("ui overlay missing"));
        bus.subscribe_fn("note_read", "exploding", |_, _| panic!("audio device lost"));
        recorder(&mut bus, "note_read", "survivor", &log);

        deliver_all(&mut bus, &Event::new("note_read", Payload::new()));
        assert_eq!(*log.borrow(), vec!["survivor:note_read"]);
        assert_eq!(bus.failure_count(), 2);
    }

    #[test]
    fn context_collects_emits_and_unsubscribes() {
        let mut bus = EventBus::new();
        let once = bus.subscribe_fn("ping", "once", |_, ctx| {
            ctx.emit("pong", Payload::new());
            ctx.unsubscribe_self();
            Ok(())
        });

        let mut contexts = deliver_all(&mut bus, &Event::new("ping", Payload::new()));
        let (emits, unsubscribes) = contexts.remove(0).into_parts();
        assert_eq!(emits, vec![("pong".to_string(), Payload::new())]);
        assert_eq!(unsubscribes, vec![once]);
        // 上下文只是请求，订阅表不变
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn global_handlers_come_after_specific_ones() {
        let mut bus = EventBus::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let global_log = Rc::clone(&log);
        bus.subscribe_all(Box::new(FnHandler::new("tap", move |e: &Event, _: &mut DispatchContext| {
            global_log.borrow_mut().push(format!("tap:{}", e.name));
            Ok(())
        })));
        recorder(&mut bus, "a", "specific", &log);

        deliver_all(&mut bus, &Event::new("a", Payload::new()));
        deliver_all(&mut bus, &Event::new("b", Payload::new()));
        assert_eq!(*log.borrow(), vec!["specific:a", "tap:a", "tap:b"]);
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[test]
    fn payload_accessors() {
        let mut payload = Payload::new();
        payload.insert("area".into(), json!("restricted"));
        payload.insert("first_read".into(), json!(false));
        payload.insert("intensity".into(), json!(3));
        let event = Event::new("area_entered", payload);

        assert!(event.is(EventName::AreaEntered));
        assert_eq!(event.str_field("area"), Some("restricted"));
        assert_eq!(event.bool_field("first_read"), Some(false));
        assert_eq!(event.u64_field("intensity"), Some(3));
        assert_eq!(event.str_field("missing"), None);
    }

    simple_handler!(CountingCue, "counting_cue", |_event, _ctx| Ok(()));

    #[test]
    fn macro_generated_handler_registers() {
        let mut bus = EventBus::new();
        let handle = bus.subscribe("story_trigger", Box::new(CountingCue::new()));
        deliver_all(&mut bus, &Event::new("story_trigger", Payload::new()));
        assert_eq!(bus.failure_count(), 0);
        assert!(bus.unsubscribe(handle));
    }
}
