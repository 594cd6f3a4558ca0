//
// Copyright 2019-2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! A minimal actor: one thread, one state value, a queue of immediate
//! and deadline-scheduled tasks. Every call runs its state machine on
//! one of these, which is what serializes state transitions, provider
//! callbacks, publish completions, and timers.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::mpsc::{channel, RecvError, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

type TaskFn<State> = Box<dyn FnOnce(&mut State) + Send>;

struct Task<State> {
    run: TaskFn<State>,
    // None means run as soon as the task is received.
    due: Option<Instant>,
}

impl<State> Task<State> {
    fn immediate(run: TaskFn<State>) -> Self {
        Self { run, due: None }
    }

    fn delayed(run: TaskFn<State>, delay: Duration) -> Self {
        Self {
            run,
            due: Some(Instant::now() + delay),
        }
    }

    fn is_delayed(&self) -> bool {
        self.due.is_some()
    }

    fn into_immediate(self) -> Self {
        Self {
            run: self.run,
            due: None,
        }
    }

    fn time_remaining(&self) -> Duration {
        match self.due {
            None => Duration::from_secs(0),
            Some(due) => due.saturating_duration_since(Instant::now()),
        }
    }
}

// BinaryHeap is a max-heap; reverse so the earliest deadline pops first.
impl<State> Ord for Task<State> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due.cmp(&other.due).reverse()
    }
}

impl<State> PartialOrd for Task<State> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<State> PartialEq for Task<State> {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due
    }
}

impl<State> Eq for Task<State> {}

/// Handle for sending tasks to an actor thread. Cloneable; the thread
/// runs until its [Stopper] fires.
pub struct Actor<State> {
    sender: Sender<Task<State>>,
    stopper: Stopper,
}

impl<State: 'static> Actor<State> {
    /// Spawn the actor thread. `gen_state` builds the state value on
    /// the new thread and may capture a clone of the actor itself for
    /// self-scheduling.
    pub fn start(
        stopper: Stopper,
        gen_state: impl FnOnce(Actor<State>) -> State + Send + 'static,
    ) -> Self {
        let (sender, receiver) = channel::<Task<State>>();

        // One flag on the inside of the loop to observe stopping, one
        // registered with the stopper to trigger it.
        let stopped = Arc::new(AtomicBool::new(false));
        let stopped_to_register = stopped.clone();

        let actor = Self {
            sender,
            stopper: stopper.clone(),
        };
        let actor_for_state = actor.clone();
        let actor_to_register = actor.clone();

        let join_handle = thread::spawn(move || {
            let mut state = gen_state(actor_for_state);
            let mut delayed_tasks = BinaryHeap::<Task<State>>::new();
            loop {
                // Wait for the next incoming task, or until the nearest
                // deadline when one is pending.
                let task = match delayed_tasks.peek() {
                    None => match receiver.recv() {
                        Ok(task) => task,
                        Err(RecvError) => break,
                    },
                    Some(next_due) => match receiver.recv_timeout(next_due.time_remaining()) {
                        Ok(task) => task,
                        Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {
                            match delayed_tasks.pop() {
                                Some(task) => task.into_immediate(),
                                None => continue,
                            }
                        }
                    },
                };
                if stopped.load(AtomicOrdering::Relaxed) {
                    break;
                }
                if task.is_delayed() {
                    delayed_tasks.push(task);
                } else {
                    (task.run)(&mut state);
                }
            }
        });

        stopper.register(Box::new(actor_to_register), stopped_to_register, join_handle);
        actor
    }

    /// Queue a task to run as soon as the actor gets to it.
    pub fn send(&self, run: impl FnOnce(&mut State) + Send + 'static) {
        let _ = self.sender.send(Task::immediate(Box::new(run)));
    }

    /// Queue a task to run no earlier than `delay` from now.
    pub fn send_delayed(&self, delay: Duration, run: impl FnOnce(&mut State) + Send + 'static) {
        let _ = self.sender.send(Task::delayed(Box::new(run), delay));
    }

    pub fn stopper(&self) -> &Stopper {
        &self.stopper
    }
}

// #[derive(Clone)] would require State: Clone.
impl<State> Clone for Actor<State> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            stopper: self.stopper.clone(),
        }
    }
}

trait Stop: Send {
    fn stop(&self, stopped: &AtomicBool);
}

impl<State> Stop for Actor<State> {
    fn stop(&self, stopped: &AtomicBool) {
        stopped.store(true, AtomicOrdering::Relaxed);
        // An empty task kicks the loop awake if it is blocked on recv.
        let _ = self.sender.send(Task::immediate(Box::new(|_state| {})));
    }
}

/// Stops every actor registered with it, in one shot. Pass one Stopper
/// to several actors and close them all together; joining needs the
/// JoinHandle, which is not cloneable, so the registry lives here
/// rather than on the (cloneable) actors.
#[derive(Clone, Default)]
pub struct Stopper {
    actors: Arc<Mutex<Vec<(Box<dyn Stop>, Arc<AtomicBool>, thread::JoinHandle<()>)>>>,
}

impl Stopper {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(
        &self,
        actor: Box<dyn Stop>,
        stopped: Arc<AtomicBool>,
        join_handle: thread::JoinHandle<()>,
    ) {
        let mut actors = self.actors.lock().expect("Couldn't get lock to add actor");
        actors.push((actor, stopped, join_handle));
    }

    /// Stop all registered actors without waiting for their threads.
    pub fn stop_all_without_joining(&self) -> Vec<thread::JoinHandle<()>> {
        let mut actors = self
            .actors
            .lock()
            .expect("Couldn't get lock to stop actors");
        actors
            .drain(..)
            .map(|(actor, stopped, join_handle)| {
                actor.stop(&stopped);
                join_handle
            })
            .collect()
    }

    /// Stop all registered actors and join their threads. Must not be
    /// called from one of the actor threads themselves.
    pub fn stop_all_and_join(&self) {
        for join_handle in self.stop_all_without_joining() {
            join_handle.join().expect("Failed to join actor thread.");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn runs_tasks_in_order() {
        let stopper = Stopper::new();
        let actor: Actor<Vec<u32>> = Actor::start(stopper.clone(), |_| Vec::new());
        let (tx, rx) = mpsc::channel();
        actor.send(|v| v.push(1));
        actor.send(|v| v.push(2));
        actor.send(move |v| {
            let _ = tx.send(v.clone());
        });
        assert_eq!(vec![1, 2], rx.recv().unwrap());
        stopper.stop_all_and_join();
    }

    #[test]
    fn delayed_tasks_fire_after_their_deadline() {
        let stopper = Stopper::new();
        let actor: Actor<()> = Actor::start(stopper.clone(), |_| ());
        let (tx, rx) = mpsc::channel();
        let started = Instant::now();
        actor.send_delayed(Duration::from_millis(80), move |_| {
            let _ = tx.send(started.elapsed());
        });
        let elapsed = rx.recv().unwrap();
        assert!(elapsed >= Duration::from_millis(80));
        stopper.stop_all_and_join();
    }

    #[test]
    fn immediate_tasks_overtake_pending_delays() {
        let stopper = Stopper::new();
        let actor: Actor<Vec<&'static str>> = Actor::start(stopper.clone(), |_| Vec::new());
        let (tx, rx) = mpsc::channel();
        actor.send_delayed(Duration::from_millis(200), |v| v.push("late"));
        actor.send(|v| v.push("now"));
        actor.send(move |v| {
            let _ = tx.send(v.clone());
        });
        assert_eq!(vec!["now"], rx.recv().unwrap());
        stopper.stop_all_and_join();
    }
}
