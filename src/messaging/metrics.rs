//! Prometheus metrics for stream messaging

use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, IntCounterVec};

/// Messaging metrics
pub struct MessagingMetrics {
    /// Messages appended by producers
    pub messages_sent: IntCounterVec,

    /// Failed appends
    pub send_failures: IntCounterVec,

    /// Messages the processor accepted
    pub messages_processed: IntCounterVec,

    /// Messages the processor rejected
    pub processing_failures: IntCounterVec,

    /// Successful acknowledgements
    pub acks: IntCounterVec,

    /// Failed acknowledgements
    pub ack_failures: IntCounterVec,

    /// Failed group reads (including malformed replies)
    pub read_failures: IntCounterVec,
}

lazy_static! {
    pub static ref MESSAGING_METRICS: MessagingMetrics = MessagingMetrics {
        messages_sent: register_int_counter_vec!(
            "stream_mq_messages_sent_total",
            "Total number of messages appended to a stream",
            &["stream"]
        )
        .unwrap(),

        send_failures: register_int_counter_vec!(
            "stream_mq_send_failures_total",
            "Total number of failed appends",
            &["stream", "error"]
        )
        .unwrap(),

        messages_processed: register_int_counter_vec!(
            "stream_mq_messages_processed_total",
            "Total number of messages processed successfully",
            &["stream", "group"]
        )
        .unwrap(),

        processing_failures: register_int_counter_vec!(
            "stream_mq_processing_failures_total",
            "Total number of messages rejected by the processor",
            &["stream", "group"]
        )
        .unwrap(),

        acks: register_int_counter_vec!(
            "stream_mq_acks_total",
            "Total number of acknowledged messages",
            &["stream", "group"]
        )
        .unwrap(),

        ack_failures: register_int_counter_vec!(
            "stream_mq_ack_failures_total",
            "Total number of failed acknowledgements",
            &["stream", "group"]
        )
        .unwrap(),

        read_failures: register_int_counter_vec!(
            "stream_mq_read_failures_total",
            "Total number of failed group reads",
            &["stream", "group", "error"]
        )
        .unwrap(),
    };
}

/// Initialize messaging metrics
pub fn init_messaging_metrics() {
    lazy_static::initialize(&MESSAGING_METRICS);
}
