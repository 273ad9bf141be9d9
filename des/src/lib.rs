//! Minimal discrete-event loop shared by the simulation crates.
//!
//! Agents receive every event in timestamp order and answer with a [`Response`]
//! carrying follow-up events (and, optionally, newly spawned agents). Events that
//! share a timestamp are delivered in the order they were scheduled, so an agent
//! can rely on "request then reply then settle" sequences within one tick.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

struct Scheduled<T> {
    t: usize,
    seq: u64,
    data: T,
}

impl<T> PartialEq for Scheduled<T> {
    fn eq(&self, other: &Self) -> bool {
        self.t == other.t && self.seq == other.seq
    }
}

impl<T> Eq for Scheduled<T> {}

impl<T> Ord for Scheduled<T> {
    // Reversed so the max-heap pops the earliest (t, seq) first.
    fn cmp(&self, other: &Self) -> Ordering {
        other.t.cmp(&self.t).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<T> PartialOrd for Scheduled<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// What an agent hands back to the loop after acting on an event.
pub struct Response<T, S> {
    pub events: Vec<(usize, T)>,
    pub agents: Vec<Box<dyn Agent<T, S>>>,
}

impl<T, S> Response<T, S> {
    pub fn new() -> Self {
        Response {
            events: Vec::new(),
            agents: Vec::new(),
        }
    }

    /// Schedule a single event.
    pub fn event(t: usize, data: T) -> Self {
        Response {
            events: vec![(t, data)],
            agents: Vec::new(),
        }
    }

    pub fn events(events: Vec<(usize, T)>) -> Self {
        Response {
            events,
            agents: Vec::new(),
        }
    }

    pub fn with_agents(mut self, agents: Vec<Box<dyn Agent<T, S>>>) -> Self {
        self.agents = agents;
        self
    }
}

impl<T, S> Default for Response<T, S> {
    fn default() -> Self {
        Self::new()
    }
}

pub trait Agent<T, S> {
    fn act(&mut self, _current_t: usize, _data: &T) -> Response<T, S> {
        Response::new()
    }

    /// Observable state, collected by [`EventLoop::stats`].
    fn stats(&self) -> S;
}

pub struct EventLoop<T, S> {
    queue: BinaryHeap<Scheduled<T>>,
    current_t: usize,
    next_seq: u64,
    agents: Vec<Box<dyn Agent<T, S>>>,
}

impl<T, S> EventLoop<T, S> {
    pub fn new(events: Vec<(usize, T)>, agents: Vec<Box<dyn Agent<T, S>>>) -> Self {
        let mut event_loop = EventLoop {
            queue: BinaryHeap::new(),
            current_t: 0,
            next_seq: 0,
            agents,
        };
        for (t, data) in events {
            event_loop.schedule(t, data);
        }
        event_loop
    }

    fn schedule(&mut self, t: usize, data: T) {
        self.queue.push(Scheduled {
            t,
            seq: self.next_seq,
            data,
        });
        self.next_seq += 1;
    }

    fn broadcast(&mut self, event: Scheduled<T>) {
        self.current_t = event.t;
        let mut spawned = Vec::new();
        let mut follow_ups = Vec::new();
        for agent in self.agents.iter_mut() {
            let response = agent.act(self.current_t, &event.data);
            follow_ups.extend(response.events);
            spawned.extend(response.agents);
        }
        for (t, data) in follow_ups {
            // Events scheduled in the past are clamped to now rather than dropped.
            self.schedule(t.max(self.current_t), data);
        }
        self.agents.extend(spawned);
    }

    /// Process events until the queue drains or the next event is later than `until`.
    pub fn run(&mut self, until: usize) {
        while let Some(next) = self.queue.peek() {
            if next.t > until {
                break;
            }
            if let Some(event) = self.queue.pop() {
                self.broadcast(event);
            }
        }
    }

    pub fn current_t(&self) -> usize {
        self.current_t
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> Vec<S> {
        self.agents.iter().map(|agent| agent.stats()).collect()
    }
}
