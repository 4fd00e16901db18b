// 本地进度操作命令
// 题目完成状态切换与各类统计摘要（冲突弹窗、侧边栏、分析页使用）

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::commands::AppState;
use crate::error::{Result, SyncError};
use crate::models::{Problem, TopicProgress};

/// 单个主题的完成统计
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicSummaryDto {
    pub topic_id: i64,
    pub completed: usize,
    pub total: usize,
    pub completion_rate: f64,
}

/// 最近完成的题目（分析页）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentCompletionDto {
    pub topic_id: i64,
    pub number: String,
    pub title: String,
    pub url: String,
    pub completed_at: DateTime<Utc>,
}

/// 切换题目完成状态，同步写入本地存储并通知后台调度器。
/// 返回切换后的完成状态。
pub fn toggle_problem(state: &AppState, topic_id: i64, problem_id: &str) -> Result<bool> {
    let mut progress = state.store.load_or_default(vec![])?;

    let mut new_state = None;
    for topic in progress.iter_mut() {
        if topic.topic_id != topic_id {
            continue;
        }
        for chapter in topic.chapters.iter_mut() {
            for subsection in chapter.subsections.iter_mut() {
                for problem in subsection.problems.iter_mut() {
                    if problem.id == problem_id {
                        new_state = Some(flip(problem));
                    }
                }
            }
        }
        // 旧版扁平列表里的题目同样可以切换
        for problem in topic.problems.iter_mut() {
            if problem.id == problem_id {
                new_state = Some(flip(problem));
            }
        }
    }

    let completed = new_state.ok_or_else(|| {
        SyncError::NotFound(format!("problem {} in topic {}", problem_id, topic_id))
    })?;

    state.store.save(&progress)?;
    if let Some(scheduler) = &state.scheduler {
        scheduler.notify_change();
    }

    Ok(completed)
}

fn flip(problem: &mut Problem) -> bool {
    problem.completed = !problem.completed;
    problem.completed_at = if problem.completed {
        Some(Utc::now())
    } else {
        None
    };
    problem.completed
}

/// 快照的完成题目总数（冲突弹窗摘要）
pub fn completed_count(progress: &[TopicProgress]) -> usize {
    progress
        .iter()
        .flat_map(|tp| &tp.chapters)
        .flat_map(|ch| &ch.subsections)
        .flat_map(|ss| &ss.problems)
        .filter(|p| p.completed)
        .count()
}

/// 按主题的完成统计
pub fn topic_summaries(progress: &[TopicProgress]) -> Vec<TopicSummaryDto> {
    progress
        .iter()
        .map(|topic| {
            let mut completed = 0;
            let mut total = 0;
            for chapter in &topic.chapters {
                for subsection in &chapter.subsections {
                    for problem in &subsection.problems {
                        total += 1;
                        if problem.completed {
                            completed += 1;
                        }
                    }
                }
            }

            let completion_rate = if total > 0 {
                completed as f64 / total as f64 * 100.0
            } else {
                0.0
            };

            TopicSummaryDto {
                topic_id: topic.topic_id,
                completed,
                total,
                completion_rate,
            }
        })
        .collect()
}

/// 最近完成的题目，按完成时间倒序。
/// 章节结构和旧版扁平列表都计入（分析页口径）。
pub fn recent_completions(progress: &[TopicProgress], limit: usize) -> Vec<RecentCompletionDto> {
    let mut completions: Vec<RecentCompletionDto> = Vec::new();

    for topic in progress {
        let structured = topic
            .chapters
            .iter()
            .flat_map(|ch| &ch.subsections)
            .flat_map(|ss| &ss.problems);
        for problem in structured.chain(topic.problems.iter()) {
            if problem.completed {
                if let Some(completed_at) = problem.completed_at {
                    completions.push(RecentCompletionDto {
                        topic_id: topic.topic_id,
                        number: problem.number.clone(),
                        title: problem.title.clone(),
                        url: problem.url.clone(),
                        completed_at,
                    });
                }
            }
        }
    }

    completions.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
    completions.truncate(limit);
    completions
}
