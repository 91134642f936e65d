mod end_to_end;
mod idempotency;
mod redelivery;
