//! A fixed set of worker threads draining one shared queue of homogeneous tasks.
//!
//! Every pool runs a single processing function supplied at construction. There is
//! no ordering guarantee between tasks; `wait_till_empty` and `close` are the only
//! synchronisation points offered to the submitting thread.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Sender};
use log::{debug, error};

use crate::error::{ConverterError, Result};

struct PoolState {
	// queued plus in-flight tasks
	pending: Mutex<usize>,
	idle: Condvar,
	completed: AtomicUsize,
	failures: Mutex<Vec<ConverterError>>,
}

impl PoolState {
	fn task_done(&self) {
		let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
		*pending -= 1;
		if *pending == 0 {
			self.idle.notify_all();
		}
	}

	fn take_failures(&self) -> Vec<ConverterError> {
		let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
		std::mem::take(&mut *failures)
	}
}

pub struct TaskPool<T: Send + 'static> {
	name: String,
	sender: Option<Sender<T>>,
	workers: Vec<JoinHandle<()>>,
	state: Arc<PoolState>,
}

impl<T: Send + 'static> TaskPool<T> {
	pub fn new<F>(name: &str, num_threads: usize, processor: F) -> Result<TaskPool<T>>
	where
		F: Fn(T) -> Result<()> + Send + Sync + 'static,
	{
		let (sender, receiver) = unbounded::<T>();
		let processor = Arc::new(processor);
		let state = Arc::new(PoolState {
			pending: Mutex::new(0),
			idle: Condvar::new(),
			completed: AtomicUsize::new(0),
			failures: Mutex::new(Vec::new()),
		});

		let num_threads = num_threads.max(1);
		let mut workers = Vec::with_capacity(num_threads);
		for i in 0..num_threads {
			let receiver = receiver.clone();
			let processor = Arc::clone(&processor);
			let state = Arc::clone(&state);
			let thread_name = format!("{}-{}", name, i);

			let handle = thread::Builder::new()
				.name(thread_name.clone())
				.spawn(move || {
					for task in receiver.iter() {
						let outcome = panic::catch_unwind(AssertUnwindSafe(|| processor(task)))
							.unwrap_or_else(|payload| Err(ConverterError::TaskPanicked(panic_message(payload))));

						if let Err(err) = outcome {
							error!("{}: {}", thread_name, err);
							state
								.failures
								.lock()
								.unwrap_or_else(PoisonError::into_inner)
								.push(err);
						}

						state.completed.fetch_add(1, Ordering::SeqCst);
						state.task_done();
					}
				})?;

			workers.push(handle);
		}

		debug!("started pool {} with {} workers", name, num_threads);

		Ok(TaskPool {
			name: name.to_string(),
			sender: Some(sender),
			workers,
			state,
		})
	}

	/// Queues a task without blocking.
	pub fn add_task(&self, task: T) -> Result<()> {
		let sender = self.sender.as_ref().ok_or(ConverterError::PoolClosed)?;

		*self.state.pending.lock().unwrap_or_else(PoisonError::into_inner) += 1;
		if sender.send(task).is_err() {
			self.state.task_done();
			return Err(ConverterError::PoolClosed);
		}

		Ok(())
	}

	/// Blocks until the queue is empty and no worker is mid-task.
	pub fn wait_till_empty(&self) {
		let mut pending = self.state.pending.lock().unwrap_or_else(PoisonError::into_inner);
		while *pending > 0 {
			pending = self
				.state
				.idle
				.wait(pending)
				.unwrap_or_else(PoisonError::into_inner);
		}
	}

	pub fn completed(&self) -> usize {
		self.state.completed.load(Ordering::SeqCst)
	}

	pub fn is_closed(&self) -> bool {
		self.sender.is_none()
	}

	/// Drains the queue, joins every worker and reports the number of processed
	/// tasks, or every failure collected since the pool was created.
	///
	/// No task can be submitted after `close`.
	pub fn close(&mut self) -> Result<usize> {
		if self.sender.is_some() {
			self.wait_till_empty();
			self.sender = None;

			for worker in self.workers.drain(..) {
				if let Err(payload) = worker.join() {
					self.state
						.failures
						.lock()
						.unwrap_or_else(PoisonError::into_inner)
						.push(ConverterError::TaskPanicked(panic_message(payload)));
				}
			}

			debug!("closed pool {} after {} tasks", self.name, self.completed());
		}

		let failures = self.state.take_failures();
		if failures.is_empty() {
			Ok(self.completed())
		} else {
			Err(ConverterError::Tasks(failures))
		}
	}
}

impl<T: Send + 'static> Drop for TaskPool<T> {
	fn drop(&mut self) {
		self.sender = None;
		for worker in self.workers.drain(..) {
			let _ = worker.join();
		}
	}
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
	if let Some(message) = payload.downcast_ref::<&str>() {
		message.to_string()
	} else if let Some(message) = payload.downcast_ref::<String>() {
		message.clone()
	} else {
		"unknown panic".to_string()
	}
}
