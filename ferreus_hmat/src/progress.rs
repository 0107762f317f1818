/////////////////////////////////////////////////////////////////////////////////////////////
//
// Defines progress reporting messages, sinks, and helper functions for assembly and factorization.
//
// Created on: 18 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! Progress reporting primitives for long-running H-matrix computations.

use std::fmt::Debug;
use std::sync::{mpsc, Arc};
use std::thread;

/// Progress events emitted during assembly and factorization.
#[derive(Debug, Clone)]
pub enum ProgressMsg {
    /// Event emitted once the block tree has been assembled and recompressed.
    Assembly {
        compressed_size: usize,
        uncompressed_size: usize,
    },

    /// Event indicating iteration status of the largest eigenvalue estimate.
    EigenValueIteration {
        iter: usize,
        eigenvalue: f64,
        relative_precision: f64,
    },

    /// Event indicating the outcome of one regularized factorization attempt.
    FactorizationAttempt {
        iter: usize,
        regularization: f64,
        success: bool,
    },

    /// Arbitrary informational message.
    Message { message: String },
}

/// Sink that consumes progress messages.
pub trait ProgressSink: Send + Sync + Debug {
    fn emit(&self, msg: ProgressMsg);
}

/// Progress sink that forwards messages over a channel.
#[derive(Debug)]
pub struct ClosureSink {
    tx: mpsc::SyncSender<ProgressMsg>,
}

impl ProgressSink for ClosureSink {
    #[inline]
    fn emit(&self, msg: ProgressMsg) {
        let _ = self.tx.try_send(msg);
    }
}

/// Spawns a listener thread that runs a handler closure for each progress message.
///
/// The thread exits once every clone of the returned sink has been dropped.
pub fn closure_sink<F>(
    buffer: usize,
    mut handler: F,
) -> (Arc<dyn ProgressSink>, thread::JoinHandle<()>)
where
    F: FnMut(ProgressMsg) + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel::<ProgressMsg>(buffer.max(1));
    let sink: Arc<dyn ProgressSink> = Arc::new(ClosureSink { tx });

    let handle = thread::spawn(move || {
        while let Ok(msg) = rx.recv() {
            handler(msg);
        }
    });

    (sink, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn closure_sink_forwards_messages() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let store = received.clone();
        let (sink, handle) = closure_sink(16, move |msg| {
            if let ProgressMsg::FactorizationAttempt { iter, .. } = msg {
                store.lock().unwrap().push(iter);
            }
        });

        for iter in 0..3 {
            sink.emit(ProgressMsg::FactorizationAttempt {
                iter,
                regularization: 1.0,
                success: iter == 2,
            });
        }
        drop(sink);
        handle.join().unwrap();

        assert_eq!(*received.lock().unwrap(), vec![0, 1, 2]);
    }
}
