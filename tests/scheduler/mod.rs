mod async_follow_up;
mod lifecycle_taxonomy;
