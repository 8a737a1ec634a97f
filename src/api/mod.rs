// External collaborators: sentiment feed and advisory commentary
pub mod advisor;
pub mod sentiment;

pub use advisor::{Advisor, OpenAiAdvisor};
pub use sentiment::{CotSentimentClient, Sentiment, SentimentCache, SentimentFeed};
