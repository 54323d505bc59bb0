use std::fmt::Write;

use studentconnect_client::models::{Comment, Post, PostDetails, User};
use studentconnect_client::utils::display_timestamp;

const PREVIEW_CHARS: usize = 80;

/// One line per post, as used by `feed` and `user-posts`.
pub fn post_list(posts: &[Post]) -> String {
    if posts.is_empty() {
        return "No posts found.\n".to_string();
    }
    let mut out = String::new();
    for post in posts {
        let _ = writeln!(
            out,
            "  [{}] ({}) {} - @{} {} [{} comments]",
            post.id,
            post.post_type,
            post.title,
            post.author_username,
            display_timestamp(&post.created_at),
            post.comments_count
        );
        let preview = preview(&post.content);
        if !preview.is_empty() {
            let _ = writeln!(out, "      {preview}");
        }
    }
    out
}

pub fn post_card(post: &Post) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} ({})", post.title, post.post_type);
    let _ = writeln!(
        out,
        "by {} (@{}) on {}",
        post.author_name,
        post.author_username,
        display_timestamp(&post.created_at)
    );
    if !post.tags.is_empty() {
        let tags: Vec<String> = post.tags.iter().map(|tag| format!("#{tag}")).collect();
        let _ = writeln!(out, "Tags: {}", tags.join(" "));
    }
    match post.kind() {
        PostDetails::Notes {
            document_url: Some(url),
            document_name,
        } => {
            let _ = writeln!(out, "Document: {} <{url}>", document_name.unwrap_or("attachment"));
        }
        PostDetails::Jobs {
            job_link,
            company,
            location,
        } => {
            if let Some(company) = company {
                let _ = writeln!(out, "Company: {company}");
            }
            if let Some(location) = location {
                let _ = writeln!(out, "Location: {location}");
            }
            if let Some(link) = job_link {
                let _ = writeln!(out, "Apply: {link}");
            }
        }
        PostDetails::Notes { .. } | PostDetails::Threads => {}
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", post.content.trim_end());
    out
}

/// Top-level comments with their direct replies indented beneath them.
/// Replies nested any deeper are not shown.
pub fn comment_thread(comments: &[Comment]) -> String {
    if comments.is_empty() {
        return "No comments yet.\n".to_string();
    }
    let mut out = String::new();
    for comment in comments {
        let _ = writeln!(out, "  {}", comment_line(comment));
        for reply in &comment.replies {
            let _ = writeln!(out, "      > {}", comment_line(reply));
        }
    }
    out
}

fn comment_line(comment: &Comment) -> String {
    format!(
        "[{}] {} (@{}) {}: {}",
        comment.id,
        comment.author_name,
        comment.author_username,
        display_timestamp(&comment.created_at),
        comment.content.trim()
    )
}

pub fn profile_card(user: &User) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} (@{})", user.name, user.username);
    let _ = writeln!(out, "Email: {}", user.email);
    if let Some(bio) = user.bio() {
        let _ = writeln!(out, "Bio: {bio}");
    }
    if let Some(url) = user.profile_picture_url() {
        let _ = writeln!(out, "Picture: {url}");
    }
    if !user.created_at.is_empty() {
        let _ = writeln!(out, "Joined: {}", display_timestamp(&user.created_at));
    }
    out
}

fn preview(content: &str) -> String {
    let first_line = content.lines().map(str::trim).find(|line| !line.is_empty());
    let Some(line) = first_line else {
        return String::new();
    };
    if line.chars().count() <= PREVIEW_CHARS {
        return line.to_string();
    }
    let mut cut: String = line.chars().take(PREVIEW_CHARS).collect();
    cut.push_str("...");
    cut
}
