/// Words too common in requests to say anything about a session.
/// Only tokens of four or more characters reach this filter.
const STOP_WORDS: &[&str] = &[
    "about", "above", "actually", "after", "again", "against", "also", "always", "another",
    "anything", "around", "because", "been", "before", "being", "below", "between", "both",
    "came", "cannot", "could", "didn", "does", "doesn", "doing", "done", "down", "during",
    "each", "else", "even", "every", "everything", "first", "from", "further", "getting",
    "give", "goes", "going", "good", "great", "have", "having", "hello", "here", "however",
    "into", "just", "know", "last", "like", "look", "looks", "made", "make", "many", "maybe",
    "more", "most", "much", "must", "need", "needs", "never", "next", "nothing", "okay",
    "once", "only", "other", "ours", "over", "please", "really", "right", "same", "should",
    "since", "some", "something", "still", "such", "sure", "take", "tell", "than", "thank",
    "thanks", "that", "their", "them", "then", "there", "these", "they", "thing", "things",
    "think", "this", "those", "through", "under", "until", "upon", "very", "want", "wants",
    "well", "were", "what", "when", "where", "whether", "which", "while", "will", "with",
    "within", "without", "would", "yeah", "your", "yours",
];

pub(super) fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.binary_search(&token).is_ok()
}
