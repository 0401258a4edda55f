//! Fixed assessment content served to the candidate and used for grading.

use serde::Serialize;

use crate::models::section::{SectionKind, WritingTask};

#[derive(Debug, Clone, Serialize)]
pub struct ChoiceQuestion {
    pub id: &'static str,
    pub question: &'static str,
    pub options: &'static [&'static str],
    #[serde(skip)]
    pub correct_answer: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadingScenario {
    pub id: u32,
    pub scenario: &'static str,
    pub questions: &'static [ChoiceQuestion],
}

#[derive(Debug, Clone, Serialize)]
pub struct VoicePrompt {
    pub id: &'static str,
    pub task_type: &'static str,
    pub text: &'static str,
    pub max_seconds: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct WritingPrompt {
    pub task: WritingTask,
    pub text: &'static str,
    pub min_words: u32,
}

pub const DEFAULT_TYPING_TEXT: &str = "Customer service is about helping people and solving problems with empathy and professionalism. When assisting customers, it's important to listen carefully, acknowledge their concerns, and provide clear solutions. Every interaction should aim to exceed expectations and leave a positive impression.";

pub const READING_SCENARIOS: &[ReadingScenario] = &[
    ReadingScenario {
        id: 1,
        scenario: "A customer calls in, clearly frustrated because they've been charged twice for their monthly subscription. They explain that they've already contacted their bank but were told to resolve it with your company directly. This is their third time calling about this issue.",
        questions: &[
            ChoiceQuestion {
                id: "q1-1",
                question: "What would be the most appropriate initial response?",
                options: &[
                    "Tell them they need to be patient as these things take time to resolve.",
                    "Apologize for the inconvenience and acknowledge their frustration.",
                    "Explain that double charges happen sometimes and it's normal.",
                    "Suggest they should have checked their account more carefully.",
                ],
                correct_answer: 1,
            },
            ChoiceQuestion {
                id: "q1-2",
                question: "What information would you need to gather first?",
                options: &[
                    "Their opinion about your company's billing system.",
                    "How many times exactly they've called before.",
                    "Their account details and the dates of the duplicate charges.",
                    "Whether they've considered canceling their subscription.",
                ],
                correct_answer: 2,
            },
        ],
    },
    ReadingScenario {
        id: 2,
        scenario: "A customer emails your technical support team about an error they're experiencing with your software. They've attached several screenshots showing the error messages. The customer mentions they have an important presentation tomorrow and need this fixed urgently. You recognize that this is a known issue that requires several steps to resolve.",
        questions: &[
            ChoiceQuestion {
                id: "q2-1",
                question: "What should be your first priority in this situation?",
                options: &[
                    "Explain that there's a queue and they'll have to wait their turn.",
                    "Acknowledge the urgency and provide immediate next steps.",
                    "Tell them to reschedule their presentation.",
                    "Suggest they should have tested the software earlier.",
                ],
                correct_answer: 1,
            },
            ChoiceQuestion {
                id: "q2-2",
                question: "What tone would be most appropriate for your response?",
                options: &[
                    "Casual and friendly",
                    "Technical and detailed",
                    "Efficient but empathetic",
                    "Brief and direct",
                ],
                correct_answer: 2,
            },
        ],
    },
];

pub const GRAMMAR_QUESTIONS: &[ChoiceQuestion] = &[
    ChoiceQuestion {
        id: "g1",
        question: "Select the sentence with correct grammar:",
        options: &[
            "We was unable to locate you're account in our system.",
            "We were unable to locate your account in our system.",
            "We was unable to locate your account in our system.",
            "We were unable to locate you're account in our system.",
        ],
        correct_answer: 1,
    },
    ChoiceQuestion {
        id: "g2",
        question: "Fill in the blank: 'Please hold while I ________ your information.'",
        options: &["access", "excess", "acess", "axcess"],
        correct_answer: 0,
    },
    ChoiceQuestion {
        id: "g3",
        question: "Which sentence uses punctuation correctly?",
        options: &[
            "Thank you for your patience I'll resolve this issue soon.",
            "Thank you for your patience, I'll resolve this issue soon.",
            "Thank you for your patience; I'll resolve this issue, soon.",
            "Thank you for your patience: I'll resolve this issue soon.",
        ],
        correct_answer: 1,
    },
    ChoiceQuestion {
        id: "g4",
        question: "Choose the correct word for the sentence: 'We value your ________ and are working to improve our service.'",
        options: &["feedback", "feedbach", "feedbak", "feedbeck"],
        correct_answer: 0,
    },
    ChoiceQuestion {
        id: "g5",
        question: "Identify the sentence with correct subject-verb agreement:",
        options: &[
            "The customer have submitted multiple requests.",
            "The customer has submitted multiple requests.",
            "The customer having submitted multiple requests.",
            "The customer be submitting multiple requests.",
        ],
        correct_answer: 1,
    },
];

pub const GRAMMAR_WRITING_PROMPT: &str = "A customer has written to complain that a product they ordered arrived damaged. Write a brief response (approx. 50 words) acknowledging their concern and explaining the next steps they should take.";

/// Response length that earns a full writing score in the grammar section.
pub const GRAMMAR_WRITING_TARGET_CHARS: usize = 50;

pub const VOICE_PROMPTS: &[VoicePrompt] = &[
    VoicePrompt {
        id: "voice1",
        task_type: "reading_aloud",
        text: "Welcome to customer service. My name is Sarah, and I'll be assisting you today. Could you please provide your account number so I can better help with your inquiry? I want to ensure we address all your concerns efficiently and thoroughly.",
        max_seconds: 30,
    },
    VoicePrompt {
        id: "voice2",
        task_type: "scenario_response",
        text: "A customer calls very upset because they've been on hold for 45 minutes trying to resolve a billing error. How would you respond to de-escalate the situation and address their concerns?",
        max_seconds: 90,
    },
    VoicePrompt {
        id: "voice3",
        task_type: "open_conversation",
        text: "Explain how you would handle a situation where you need to deny a customer's request for a refund based on company policy, while still maintaining a positive customer relationship.",
        max_seconds: 120,
    },
];

pub const WRITING_PROMPTS: &[WritingPrompt] = &[
    WritingPrompt {
        task: WritingTask::EmailResponse,
        text: "A customer emails asking why their refund has not arrived two weeks after it was approved. Write a reply that explains the refund timeline and what you will do next.",
        min_words: 80,
    },
    WritingPrompt {
        task: WritingTask::ComplaintResolution,
        text: "A long-standing customer complains that a technician missed two scheduled appointments. Write a response that acknowledges the impact, apologizes and proposes a concrete resolution.",
        min_words: 100,
    },
    WritingPrompt {
        task: WritingTask::ProcessDocumentation,
        text: "Document, step by step, how a new team member should handle a request to update a customer's billing address, including the verification checks required.",
        min_words: 120,
    },
];

#[derive(Debug, Clone, Serialize)]
pub struct SjtScenario {
    pub id: u32,
    pub situation: &'static str,
    pub options: &'static [&'static str],
}

/// Expected option per scenario id (taken modulo the key length).
pub const SJT_ANSWER_KEY: [u32; 6] = [2, 2, 1, 3, 0, 2];

pub const SJT_SCENARIOS: &[SjtScenario] = &[
    SjtScenario {
        id: 0,
        situation: "A caller insists on speaking to a manager before explaining their problem. No manager is available for the next hour.",
        options: &[
            "Transfer them to the manager's voicemail.",
            "Tell them a manager will not be available today.",
            "Explain the wait, offer to start resolving the issue now and arrange a callback if they still want one.",
            "Place them on hold until a manager is free.",
        ],
    },
    SjtScenario {
        id: 1,
        situation: "You notice a colleague has given a customer incorrect information about a warranty.",
        options: &[
            "Ignore it, since it was not your call.",
            "Tell the customer your colleague is often wrong.",
            "Let your colleague know privately and help them contact the customer with the correct details.",
            "Report the colleague to the supervisor straight away.",
        ],
    },
    SjtScenario {
        id: 2,
        situation: "A customer is shouting and using offensive language while describing a delayed delivery.",
        options: &[
            "End the call immediately.",
            "Stay calm, acknowledge the frustration and explain that you want to help once the conversation stays respectful.",
            "Raise your voice so they can hear you clearly.",
            "Put them on hold until they calm down.",
        ],
    },
    SjtScenario {
        id: 3,
        situation: "Your queue is full and a customer asks for a detailed explanation of every line on their invoice.",
        options: &[
            "Tell them to read the invoice more carefully.",
            "Rush through the explanation to reach the next caller.",
            "Send a generic FAQ link and close the ticket.",
            "Walk through the key charges now and offer a follow-up for the remaining lines.",
        ],
    },
    SjtScenario {
        id: 4,
        situation: "A customer asks for a discount you are not authorized to give.",
        options: &[
            "Explain what you can offer within policy and escalate the request if they want to pursue it.",
            "Give the discount to keep the customer happy.",
            "Refuse without further explanation.",
            "Tell them to try again later with someone else.",
        ],
    },
    SjtScenario {
        id: 5,
        situation: "A system outage prevents you from accessing customer accounts during a busy morning.",
        options: &[
            "Tell callers to call back tomorrow.",
            "Pretend everything is working and guess at answers.",
            "Inform callers about the outage, record their details and commit to a callback once systems return.",
            "Stop answering calls until the outage is over.",
        ],
    },
];

pub fn reading_question_count() -> usize {
    READING_SCENARIOS.iter().map(|s| s.questions.len()).sum()
}

pub fn voice_prompt(index: usize) -> Option<&'static VoicePrompt> {
    VOICE_PROMPTS.get(index)
}

pub fn writing_prompt(task: WritingTask) -> &'static WritingPrompt {
    WRITING_PROMPTS
        .iter()
        .find(|p| p.task == task)
        .unwrap_or(&WRITING_PROMPTS[0])
}

pub fn sjt_correct_option(scenario_id: u32) -> u32 {
    SJT_ANSWER_KEY[scenario_id as usize % SJT_ANSWER_KEY.len()]
}

/// Number of options of a question in the given bank, if the question exists.
pub fn option_count(kind: SectionKind, question_id: &str) -> Option<usize> {
    match kind {
        SectionKind::Reading => READING_SCENARIOS
            .iter()
            .flat_map(|s| s.questions.iter())
            .find(|q| q.id == question_id)
            .map(|q| q.options.len()),
        SectionKind::Grammar => GRAMMAR_QUESTIONS
            .iter()
            .find(|q| q.id == question_id)
            .map(|q| q.options.len()),
        SectionKind::Sjt => {
            let id: u32 = question_id.parse().ok()?;
            SJT_SCENARIOS
                .iter()
                .find(|s| s.id == id)
                .map(|s| s.options.len())
        }
        _ => None,
    }
}
