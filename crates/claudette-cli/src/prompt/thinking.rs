use rand::seq::SliceRandom;

const THINKING_MESSAGES: &[&str] = &[
    "Thinking",
    "Pondering",
    "Reading between the lines",
    "Consulting the weights",
    "Connecting the dots",
    "Weighing the options",
    "Sharpening the pencil",
    "Warming up the model",
    "Untangling the request",
    "Looking for the right words",
];

pub fn get_random_thinking_message() -> &'static str {
    THINKING_MESSAGES
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or("Thinking")
}
