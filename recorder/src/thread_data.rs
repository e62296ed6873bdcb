//! Per-thread monitoring state
//!
//! Each application thread owns one [`ThreadData`]: the stack of elements it
//! is currently inside, a duplicate flag per stack position and the thread's
//! own cpu and use time.

use crate::arena::ElementArena;
use crate::element::{ElementId, NOT_RECORDING};
use crate::pool::{StackCopy, StackPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StackEntry {
    element: ElementId,
    duplicate: bool,
}

/// Monitoring state of one application thread
#[derive(Debug, Clone)]
pub struct ThreadData {
    start_use_time_ticks: i64,
    total_use_time_ticks: i64,
    cpu_time_ticks: i64,
    start_cpu_time_ticks: i64,
    nesting: u32,
    fallback: Option<ElementId>,
    stack: Vec<StackEntry>,
}

impl Default for ThreadData {
    fn default() -> Self {
        Self {
            start_use_time_ticks: NOT_RECORDING,
            total_use_time_ticks: 0,
            cpu_time_ticks: 0,
            start_cpu_time_ticks: NOT_RECORDING,
            nesting: 0,
            fallback: None,
            stack: Vec::with_capacity(4),
        }
    }
}

impl ThreadData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a (possibly nested) time recording; only the outermost one
    /// takes the start ticks
    pub fn start_time_recording(&mut self, thread_ticks: i64) {
        if self.nesting == 0 {
            self.start_cpu_time_ticks = thread_ticks;
        }
        self.nesting += 1;
    }

    /// Closes a time recording; the outermost one accumulates cpu ticks
    pub fn stop_time_recording(&mut self, thread_ticks: i64) {
        self.nesting = self.nesting.saturating_sub(1);
        if self.nesting == 0 && self.start_cpu_time_ticks >= 0 {
            self.cpu_time_ticks += thread_ticks - self.start_cpu_time_ticks;
            self.start_cpu_time_ticks = NOT_RECORDING;
        }
    }

    /// Marks the start of the thread's lifetime
    pub fn start(&mut self, thread_ticks: i64) {
        if self.start_use_time_ticks < 0 {
            self.start_use_time_ticks = thread_ticks;
        }
    }

    /// Marks the end of the thread's lifetime
    pub fn end(&mut self, thread_ticks: i64) {
        if self.start_use_time_ticks > 0 && thread_ticks > 0 {
            self.total_use_time_ticks += thread_ticks - self.start_use_time_ticks;
            self.start_use_time_ticks = NOT_RECORDING;
        }
    }

    pub fn is_ended(&self) -> bool {
        self.cpu_time_ticks > 0
    }

    pub fn total_use_time_ticks(&self) -> i64 {
        self.total_use_time_ticks
    }

    pub fn cpu_time_ticks(&self) -> i64 {
        self.cpu_time_ticks
    }

    /// Pushes `element`, flagging it as duplicate if it is already on the stack
    pub fn push(&mut self, element: ElementId) {
        let duplicate = self.stack.iter().any(|entry| entry.element == element);
        self.stack.push(StackEntry { element, duplicate });
    }

    /// Removes the topmost occurrence of `element`; entries above it move down
    pub fn pop(&mut self, element: ElementId) {
        if let Some(position) = self.stack.iter().rposition(|entry| entry.element == element) {
            self.stack.remove(position);
        }
    }

    pub fn top(&self) -> Option<ElementId> {
        self.stack.last().map(|entry| entry.element)
    }

    /// Nearest element from the top belonging to variability `var_id`
    pub fn top_var(&self, arena: &ElementArena, var_id: i32) -> Option<ElementId> {
        self.stack
            .iter()
            .rev()
            .map(|entry| entry.element)
            .find(|element| arena.get(*element).var_id() == var_id)
    }

    pub fn stack_index(&self, element: ElementId) -> Option<usize> {
        self.stack.iter().position(|entry| entry.element == element)
    }

    pub fn stack_size(&self) -> usize {
        self.stack.len()
    }

    pub fn stack_element(&self, index: usize) -> Option<ElementId> {
        self.stack.get(index).map(|entry| entry.element)
    }

    pub fn is_stack_element_duplicated(&self, index: usize) -> bool {
        self.stack.get(index).is_some_and(|entry| entry.duplicate)
    }

    /// Whether `element` is on the stack, optionally ignoring the top entry
    pub fn is_on_stack(&self, element: ElementId, include_top: bool) -> bool {
        let visible = if include_top {
            &self.stack[..]
        } else {
            &self.stack[..self.stack.len().saturating_sub(1)]
        };
        visible.iter().any(|entry| entry.element == element)
    }

    pub fn fallback(&self) -> Option<ElementId> {
        self.fallback
    }

    pub fn set_fallback(&mut self, element: Option<ElementId>) {
        self.fallback = element;
    }

    /// Takes over the call stack of `other`, e.g. for a thread handing work
    /// to a new thread
    pub fn copy_stack_from(&mut self, other: &ThreadData) {
        self.stack.clone_from(&other.stack);
    }

    /// Shared copy of the stack without duplicate positions
    pub fn create_stack_copy(&self, pool: &mut StackPool) -> StackCopy {
        let unique: Vec<ElementId> = self
            .stack
            .iter()
            .filter(|entry| !entry.duplicate)
            .map(|entry| entry.element)
            .collect();
        pool.acquire(&unique)
    }

    pub fn release_stack(pool: &mut StackPool, copy: StackCopy) {
        pool.release(copy);
    }
}
