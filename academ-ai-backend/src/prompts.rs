use language_utils::{
    BLANK, GrammarRequest, LearnerSettings, OPTIONS_PER_QUESTION, QUIZ_BATCH_SIZE, QuizRequest,
    TtsRequest, VOCAB_BATCH_SIZE, VocabRequest,
};

pub fn tutor_instruction(settings: &LearnerSettings) -> String {
    let LearnerSettings {
        target_language: target,
        native_language: native,
        proficiency,
    } = settings;
    format!(
        r#"You are a friendly, patient and expert language tutor teaching {target} to a {proficiency} level student whose native language is {native}.

Your goal is to help them practice conversation.

MANDATORY RULE: For EVERY message you send in {target}, you MUST provide a full translation into {native} immediately following the original text. Format it like this:
[Your response in {target}]
({native} translation: [Your translation])

Correct the student's mistakes gently by providing the corrected form after your response in parentheses.
Keep your responses relatively concise (under 3 sentences) to encourage back-and-forth dialogue."#
    )
}

pub fn vocab(request: &VocabRequest) -> String {
    let VocabRequest {
        target_language,
        native_language,
        topic,
    } = request;
    format!(
        r#"Generate exactly {VOCAB_BATCH_SIZE} vocabulary flashcards for {target_language} related to the topic: "{topic}". Provide translations in {native_language} and a simple example sentence in {target_language} for each word."#
    )
}

pub fn quiz(request: &QuizRequest) -> String {
    let QuizRequest {
        target_language,
        native_language,
        proficiency,
    } = request;
    let distractors = OPTIONS_PER_QUESTION - 1;
    format!(
        r#"Generate {QUIZ_BATCH_SIZE} interactive "fill-in-the-blank" questions for a {proficiency} level student learning {target_language}.
The student's native language is {native_language}.
Each question must have:
- A sentence in {target_language} with one word missing replaced by "{BLANK}".
- The correct word that fills the blank.
- {OPTIONS_PER_QUESTION} options: the correct word and {distractors} distractors (wrong but plausible), in random order.
- A full translation of the sentence into {native_language}.
- A short explanation in {native_language} of why the word is correct."#
    )
}

pub fn grammar(request: &GrammarRequest) -> String {
    let GrammarRequest {
        target_language,
        native_language,
        topic,
    } = request;
    format!(
        r#"Explain the grammar concept "{topic}" in {target_language} for a {native_language} speaker.
Provide clear rules, exceptions, and 3 example sentences with translations in {native_language}.
Format the output in clean Markdown."#
    )
}

pub fn speech(request: &TtsRequest) -> String {
    format!("Say clearly: {}", request.text)
}
