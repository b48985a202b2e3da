//! Seed knowledge for well-known city objects.

use crate::llm::normalizer::normalize_object_type;
use crate::models::{KnowledgeItem, QuizItem};
use rand::Rng;
use rand::seq::IndexedRandom;

fn item(
    object_type: &str,
    display_name: &str,
    aliases: &[&str],
    facts: &[&str],
    quiz: &[(&str, &str)],
) -> KnowledgeItem {
    KnowledgeItem {
        object_type: object_type.to_string(),
        display_name: display_name.to_string(),
        aliases: aliases.iter().map(|a| (*a).to_string()).collect(),
        facts: facts.iter().map(|f| (*f).to_string()).collect(),
        quiz: quiz
            .iter()
            .map(|(question, answer)| QuizItem {
                question: (*question).to_string(),
                answer: (*answer).to_string(),
            })
            .collect(),
    }
}

/// Static facts and quizzes keyed by canonical object type.
#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    items: Vec<KnowledgeItem>,
}

impl KnowledgeBase {
    /// Creates a knowledge base from items.
    #[must_use]
    pub const fn new(items: Vec<KnowledgeItem>) -> Self {
        Self { items }
    }

    /// The built-in seed set.
    #[must_use]
    pub fn builtin() -> Self {
        Self::new(vec![
            item(
                "manhole",
                "井盖",
                &["井盖", "窨井盖", "下水道井盖", "manhole_cover"],
                &[
                    "井盖下面连着城市的地下管道，工人叔叔可以从这里下去检修。",
                    "井盖大多是圆形的，圆形的盖子怎么转都不会掉进井里。",
                ],
                &[
                    ("井盖下面的通道主要是给工人做什么用的？", "检修"),
                    ("为了安全，我们不要在井盖的哪里蹦跳？", "上方"),
                ],
            ),
            item(
                "mailbox",
                "邮箱",
                &["邮箱", "邮筒", "信箱", "postbox"],
                &[
                    "邮筒是用来投寄信件的，邮递员会定时把里面的信取走。",
                    "在信封上写好邮编，信件就能更快找到要去的地方。",
                ],
                &[
                    ("邮筒里装的是什么？", "信件"),
                    ("信封上帮助信件找到地区的一串数字叫什么？", "邮编"),
                ],
            ),
            item(
                "tree",
                "树",
                &["树", "树木", "大树", "行道树"],
                &[
                    "树叶会吸收二氧化碳，再放出我们呼吸需要的氧气。",
                    "行道树能给街道遮阴，夏天走在树下会更凉快。",
                ],
                &[
                    ("树叶会吸收哪一种气体？", "二氧化碳"),
                    ("树叶会放出我们呼吸需要的什么气体？", "氧气"),
                ],
            ),
            item(
                "road_sign",
                "路牌",
                &["路牌", "路标", "指示牌", "交通标志", "street_sign"],
                &[
                    "路牌用颜色和形状告诉大家交通规则，圆形常常表示禁止或指示。",
                    "蓝色的路牌常常告诉我们路名和方向。",
                ],
                &[
                    ("路牌除了颜色，还用什么来区分不同的意思？", "形状"),
                    ("路牌提醒大家遵守交通的什么？", "规则"),
                ],
            ),
            item(
                "traffic_light",
                "红绿灯",
                &["红绿灯", "信号灯", "交通灯", "traffic_signal_light"],
                &[
                    "红灯亮时车辆和行人都要停止，绿灯亮时才可以通行。",
                    "黄灯亮起表示灯马上要变了，要提前准备停下来。",
                ],
                &[
                    ("红灯亮的时候我们应该怎么做？", "停止"),
                    ("绿灯亮的意思是可以怎样？", "通行"),
                ],
            ),
        ])
    }

    /// Looks up an item by canonical object type.
    #[must_use]
    pub fn get(&self, object_type: &str) -> Option<&KnowledgeItem> {
        self.items.iter().find(|item| item.object_type == object_type)
    }

    /// Resolves a detected label to a canonical object type.
    ///
    /// Matches the item's object type or any alias after normalization;
    /// otherwise returns the normalized label itself.
    #[must_use]
    pub fn resolve(&self, label: &str) -> String {
        let normalized = normalize_object_type(label);
        self.items
            .iter()
            .find(|item| {
                item.object_type == normalized
                    || item
                        .aliases
                        .iter()
                        .any(|alias| normalize_object_type(alias) == normalized)
            })
            .map_or(normalized, |item| item.object_type.clone())
    }

    /// Child-facing name for an object type.
    #[must_use]
    pub fn display_name(&self, object_type: &str) -> String {
        self.get(object_type).map_or_else(
            || object_type.replace('_', " ").trim().to_string(),
            |item| item.display_name.clone(),
        )
    }

    /// Picks a random fact and quiz for an object type.
    #[must_use]
    pub fn pick<R: Rng + ?Sized>(
        &self,
        object_type: &str,
        rng: &mut R,
    ) -> Option<(String, QuizItem)> {
        let item = self.get(object_type)?;
        let fact = item.facts.choose(rng)?;
        let quiz = item.quiz.choose(rng)?;
        Some((fact.clone(), quiz.clone()))
    }
}

impl Default for KnowledgeBase {
    fn default() -> Self {
        Self::builtin()
    }
}
