//! 虚拟时钟定时器
//!
//! 只在 `tick` 推进时钟时运行，不依赖真实时间；任务可以单独取消，也可以整体清空。

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;

/// 已调度任务的句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// 定时队列条目
struct ScheduledEntry<T> {
    due_ms: u64,
    id: TaskId,
    task: T,
}

// 最大堆取反：到期早的先出，同时到期时先调度的先出（FIFO）
impl<T> Ord for ScheduledEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        match other.due_ms.cmp(&self.due_ms) {
            Ordering::Equal => other.id.cmp(&self.id),
            order => order,
        }
    }
}

impl<T> PartialOrd for ScheduledEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Eq for ScheduledEntry<T> {}

impl<T> PartialEq for ScheduledEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.due_ms == other.due_ms && self.id == other.id
    }
}

/// 一个待执行的任务（只读视图）
#[derive(Debug, Clone, PartialEq)]
pub struct PendingTask<'a, T> {
    pub id: TaskId,
    pub due_ms: u64,
    pub task: &'a T,
}

pub struct Scheduler<T> {
    now_ms: u64,
    next_id: u64,
    queue: BinaryHeap<ScheduledEntry<T>>,
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Scheduler {
            now_ms: 0,
            next_id: 0,
            queue: BinaryHeap::new(),
        }
    }

    /// 当前模拟时钟（毫秒）
    pub fn now(&self) -> u64 {
        self.now_ms
    }

    /// 推进时钟；时钟不会倒退
    pub fn set_clock(&mut self, now_ms: u64) {
        self.now_ms = self.now_ms.max(now_ms);
    }

    /// 清空队列并把时钟设为 `now_ms`（读档用，允许倒退）
    pub fn reset_clock(&mut self, now_ms: u64) {
        self.queue.clear();
        self.now_ms = now_ms;
    }

    pub fn schedule(&mut self, delay_ms: u64, task: T) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        self.queue.push(ScheduledEntry {
            due_ms: self.now_ms.saturating_add(delay_ms),
            id,
            task,
        });
        id
    }

    /// 取消单个任务；任务已执行或已取消时返回 false
    pub fn cancel(&mut self, id: TaskId) -> bool {
        let before = self.queue.len();
        self.queue.retain(|entry| entry.id != id);
        self.queue.len() != before
    }

    /// 取消所有任务，返回被取消的数量
    pub fn cancel_all(&mut self) -> usize {
        let cancelled = self.queue.len();
        self.queue.clear();
        cancelled
    }

    /// 取出下一个在 `until_ms` 之前（含）到期的任务，并把时钟推进到它的到期时间
    ///
    /// 调用方循环调用直到返回 `None`，再用 [`Scheduler::set_clock`] 把时钟推到 `until_ms`。
    /// 任务执行中新调度的任务如果也在窗口内到期，会在同一轮被取出。
    pub fn pop_due(&mut self, until_ms: u64) -> Option<(TaskId, T)> {
        if self.queue.peek()?.due_ms > until_ms {
            return None;
        }
        let entry = self.queue.pop()?;
        self.set_clock(entry.due_ms);
        Some((entry.id, entry.task))
    }

    /// 按执行顺序列出待执行任务
    pub fn pending(&self) -> Vec<PendingTask<'_, T>> {
        let mut tasks: Vec<PendingTask<'_, T>> = self
            .queue
            .iter()
            .map(|entry| PendingTask {
                id: entry.id,
                due_ms: entry.due_ms,
                task: &entry.task,
            })
            .collect();
        tasks.sort_by(|a, b| a.due_ms.cmp(&b.due_ms).then(a.id.cmp(&b.id)));
        tasks
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Scheduler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("now_ms", &self.now_ms)
            .field("pending", &self.queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(scheduler: &mut Scheduler<&'static str>, until: u64) -> Vec<(u64, &'static str)> {
        let mut out = Vec::new();
        while let Some((_, task)) = scheduler.pop_due(until) {
            out.push((scheduler.now(), task));
        }
        scheduler.set_clock(until);
        out
    }

    #[test]
    fn tasks_run_in_due_then_fifo_order() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(300, "late");
        scheduler.schedule(100, "early");
        scheduler.schedule(100, "early_second");

        assert_eq!(drain(&mut scheduler, 50), vec![]);
        assert_eq!(
            drain(&mut scheduler, 1000),
            vec![(100, "early"), (100, "early_second"), (300, "late")]
        );
        assert_eq!(scheduler.now(), 1000);
    }

    #[test]
    fn nothing_runs_before_it_is_due() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(3000, "power");
        assert!(drain(&mut scheduler, 2999).is_empty());
        assert_eq!(drain(&mut scheduler, 3000), vec![(3000, "power")]);
    }

    #[test]
    fn cancelled_tasks_never_run() {
        let mut scheduler = Scheduler::new();
        let doomed = scheduler.schedule(10, "doomed");
        scheduler.schedule(20, "kept");

        assert!(scheduler.cancel(doomed));
        assert!(!scheduler.cancel(doomed));
        assert_eq!(drain(&mut scheduler, 100), vec![(20, "kept")]);
    }

    #[test]
    fn cancel_all_empties_queue() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(10, "a");
        scheduler.schedule(20, "b");
        assert_eq!(scheduler.cancel_all(), 2);
        assert!(scheduler.is_empty());
        assert!(drain(&mut scheduler, 100).is_empty());
    }

    #[test]
    fn delays_are_relative_to_current_clock() {
        let mut scheduler = Scheduler::new();
        scheduler.set_clock(500);
        scheduler.schedule(100, "x");
        let pending = scheduler.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].due_ms, 600);

        scheduler.set_clock(100);
        assert_eq!(scheduler.now(), 500);

        scheduler.reset_clock(100);
        assert_eq!(scheduler.now(), 100);
        assert!(scheduler.is_empty());
    }
}
