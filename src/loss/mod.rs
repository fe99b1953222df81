//! Loss detection: pluggable predictors plus NACK/ACK feedback generation.

pub mod nack_ack;
pub mod predictor;

pub use nack_ack::{FeedbackBatch, FeedbackGenerator};
pub use predictor::{Ar2Predictor, MovingAveragePredictor, Predictor, PredictorEvent, RtxArrival, SimplePredictor};
