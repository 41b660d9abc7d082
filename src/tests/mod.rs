// End-to-end scenarios driven through the transcription service with fake
// providers.

mod support;
