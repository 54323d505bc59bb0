use crate::render;
use anyhow::{anyhow, bail, Context, Result};
use std::collections::HashMap;
use std::io::{self, Write};
use studentconnect_client::forms::{
    self, CommentForm, ForgotPasswordForm, LoginForm, ProfileForm, ResetPasswordForm, SignupForm,
};
use studentconnect_client::models::{Pagination, PostQuery, PostType};
use studentconnect_client::payload::{parse_tags, PostDraft, PostKind, Upload};
use studentconnect_client::{ClientError, SessionStore};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Run the interactive shell until `exit` or end of input.
pub async fn run_shell(session: SessionStore) -> Result<()> {
    let mut cli = CliSession::new(session);

    println!("StudentConnect CLI ready. Type 'help' for a list of commands.");
    cli.print_whoami();

    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin);

    loop {
        print!("{}", cli.prompt());
        io::stdout().flush()?;

        let mut line = String::new();
        let read = reader.read_line(&mut line).await?;
        if read == 0 {
            println!("Exiting");
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let tokens = match shell_words::split(trimmed) {
            Ok(tokens) if !tokens.is_empty() => tokens,
            Ok(_) => continue,
            Err(err) => {
                println!("Unable to parse command: {err}");
                continue;
            }
        };

        match cli.handle_command(&tokens).await {
            Ok(LoopAction::Continue) => {}
            Ok(LoopAction::Exit) => break,
            Err(err) => {
                println!("Error: {err:#}");
            }
        }
    }

    Ok(())
}

/// Run a single shell command, as `studentconnect exec ...` does.
pub async fn run_once(session: SessionStore, tokens: &[String]) -> Result<()> {
    if tokens.is_empty() {
        bail!("no command given; try `studentconnect exec help`");
    }
    let mut cli = CliSession::new(session);
    cli.handle_command(tokens).await?;
    Ok(())
}

struct CliSession {
    session: SessionStore,
}

#[derive(Debug, PartialEq, Eq)]
enum LoopAction {
    Continue,
    Exit,
}

/// Converts a client error into the message shown to the user, falling back
/// to a per-command generic text when the backend gave no detail.
fn failure(fallback: &'static str) -> impl FnOnce(ClientError) -> anyhow::Error {
    move |err| {
        tracing::debug!(error = %err, "command failed");
        anyhow!(err.display_message(fallback))
    }
}

impl CliSession {
    fn new(session: SessionStore) -> Self {
        Self { session }
    }

    fn prompt(&self) -> String {
        match self.session.current_user() {
            Some(user) => format!("studentconnect(@{})> ", user.username),
            None => "studentconnect> ".to_string(),
        }
    }

    async fn handle_command(&mut self, tokens: &[String]) -> Result<LoopAction> {
        let command = tokens[0].as_str();
        let args = Args::parse(&tokens[1..], leading_words(command));
        match command {
            "help" => {
                self.print_help();
            }
            "whoami" => {
                self.print_whoami();
            }
            "login" => {
                let Some([email, password]) = args.exactly::<2>() else {
                    println!("Usage: login <email> <password>");
                    return Ok(LoopAction::Continue);
                };
                self.login(email, password).await?;
            }
            "signup" => {
                let Some([name, username, email, password]) = args.exactly::<4>() else {
                    println!("Usage: signup <name> <username> <email> <password> [bio=TEXT]");
                    return Ok(LoopAction::Continue);
                };
                let form = SignupForm {
                    name: name.to_string(),
                    username: username.to_string(),
                    email: email.to_string(),
                    password: password.to_string(),
                    bio: args.option("bio").map(str::to_string),
                };
                let user = form
                    .submit(&self.session)
                    .await
                    .map_err(failure("Signup failed"))?;
                println!("Account created for @{}. Log in to continue.", user.username);
            }
            "logout" => {
                self.session
                    .logout()
                    .map_err(failure("Failed to clear the stored session"))?;
                println!("Logged out.");
            }
            "forgot-password" => {
                let Some([email]) = args.exactly::<1>() else {
                    println!("Usage: forgot-password <email>");
                    return Ok(LoopAction::Continue);
                };
                let form = ForgotPasswordForm {
                    email: email.to_string(),
                };
                let reply = form
                    .submit(&self.session)
                    .await
                    .map_err(failure("Failed to send password reset email"))?;
                println!("{}", reply.message);
            }
            "reset-password" => {
                let Some([link, password, confirmation]) = args.exactly::<3>() else {
                    println!("Usage: reset-password <reset-link|token> <new-password> <confirm>");
                    return Ok(LoopAction::Continue);
                };
                self.reset_password(link, password, confirmation).await?;
            }
            "feed" | "posts" => {
                let mut query = PostQuery::default();
                if let Some(kind) = args.option("type") {
                    query = query.post_type(kind.parse::<PostType>()?);
                }
                if let Some(term) = args.option("search") {
                    query = query.search(term);
                }
                let page = args.pagination()?;
                query.skip = page.skip;
                query.limit = page.limit;
                let posts = self
                    .session
                    .api()
                    .list_posts(&query)
                    .await
                    .map_err(failure("Failed to load posts"))?;
                print!("{}", render::post_list(&posts));
            }
            "view-post" | "post" => {
                let Some([post_id]) = args.exactly::<1>() else {
                    println!("Usage: view-post <post_id>");
                    return Ok(LoopAction::Continue);
                };
                self.view_post(post_id).await?;
            }
            "new-post" => {
                let Some([kind, title, content]) = args.exactly::<3>() else {
                    println!(
                        "Usage: new-post <notes|jobs|threads> TITLE CONTENT [tags=a,b] \
                         [link=URL company=NAME location=PLACE] [document=PATH]"
                    );
                    return Ok(LoopAction::Continue);
                };
                self.new_post(kind, title, content, &args).await?;
            }
            "comment" => {
                if args.positional.len() < 2 {
                    println!("Usage: comment <post_id> MESSAGE");
                    return Ok(LoopAction::Continue);
                }
                let form = CommentForm::new(args.positional[0], args.positional[1..].join(" "));
                let comment = form
                    .submit(&self.session)
                    .await
                    .map_err(failure("Failed to add comment"))?;
                println!("Commented {}", comment.id);
            }
            "reply" => {
                if args.positional.len() < 3 {
                    println!("Usage: reply <post_id> <comment_id> MESSAGE");
                    return Ok(LoopAction::Continue);
                }
                let form = CommentForm::new(args.positional[0], args.positional[2..].join(" "))
                    .reply_to(args.positional[1]);
                let comment = form
                    .submit(&self.session)
                    .await
                    .map_err(failure("Failed to add reply"))?;
                println!("Replied {}", comment.id);
            }
            "profile" => {
                self.profile(args.positional.first().copied()).await?;
            }
            "user-posts" => {
                let Some([username]) = args.exactly::<1>() else {
                    println!("Usage: user-posts <username> [skip=N] [limit=N]");
                    return Ok(LoopAction::Continue);
                };
                let posts = self
                    .session
                    .api()
                    .user_posts(username, &args.pagination()?)
                    .await
                    .map_err(failure("Failed to load posts"))?;
                print!("{}", render::post_list(&posts));
            }
            "edit-profile" => {
                let form = ProfileForm {
                    name: args.option("name").map(str::to_string),
                    username: args.option("username").map(str::to_string),
                    bio: args.option("bio").map(str::to_string),
                };
                if form == ProfileForm::default() {
                    println!("Usage: edit-profile [name=NAME] [username=NAME] [bio=TEXT]");
                    return Ok(LoopAction::Continue);
                }
                let user = form
                    .submit(&self.session)
                    .await
                    .map_err(failure("Failed to update profile"))?;
                print!("{}", render::profile_card(&user));
            }
            "avatar" => {
                let Some([path]) = args.exactly::<1>() else {
                    println!("Usage: avatar <image-path>");
                    return Ok(LoopAction::Continue);
                };
                let upload = Upload::from_path(path)
                    .await
                    .with_context(|| format!("failed to read {path}"))?;
                let user = forms::upload_profile_picture(&self.session, upload)
                    .await
                    .map_err(failure("Failed to upload profile picture"))?;
                println!(
                    "Profile picture updated: {}",
                    user.profile_picture_url().unwrap_or("(none)")
                );
            }
            "quit" | "exit" => return Ok(LoopAction::Exit),
            "clear" => {
                print!("\x1B[2J\x1B[1;1H");
            }
            other => {
                println!("Unknown command '{other}'. Type 'help' for a list of commands.");
            }
        }
        Ok(LoopAction::Continue)
    }

    fn print_help(&self) {
        println!("Available commands:");
        println!("  help                           Show this help message");
        println!("  whoami                         Show the logged in user");
        println!("  login EMAIL PASSWORD           Log in and remember the session");
        println!("  signup NAME USER EMAIL PASS [bio=TEXT]  Create an account");
        println!("  logout                         Forget the stored session");
        println!("  forgot-password EMAIL          Email a password reset link");
        println!("  reset-password LINK PASS PASS  Set a new password from a reset link");
        println!("  feed [type=T] [search=Q] [skip=N] [limit=N]  List posts");
        println!("  view-post ID                   Show a post and its comments");
        println!("  new-post TYPE TITLE CONTENT [tags=a,b] [link=URL] [company=C] [location=L] [document=PATH]");
        println!("  comment POST_ID MESSAGE        Comment on a post");
        println!("  reply POST_ID COMMENT_ID MSG   Reply to a comment");
        println!("  profile [USERNAME]             Show a profile (default: yours)");
        println!("  user-posts USERNAME [skip=N] [limit=N]  List a user's posts");
        println!("  edit-profile [name=] [username=] [bio=]  Update your profile");
        println!("  avatar PATH                    Upload a profile picture (image, max 5MB)");
        println!("  clear                          Clear the screen");
        println!("  exit                           Quit the CLI");
    }

    fn print_whoami(&self) {
        let snapshot = self.session.snapshot();
        match snapshot.current_user {
            Some(user) => print!("{}", render::profile_card(&user)),
            None if snapshot.is_loading => println!("Session not resolved yet."),
            None => println!("Not logged in."),
        }
    }

    async fn login(&mut self, email: &str, password: &str) -> Result<()> {
        let form = LoginForm {
            email: email.to_string(),
            password: password.to_string(),
        };
        form.submit(&self.session)
            .await
            .map_err(failure("Login failed"))?;
        match self.session.current_user() {
            Some(user) => println!("Logged in as @{}", user.username),
            None => println!("Logged in."),
        }
        Ok(())
    }

    async fn reset_password(&mut self, link: &str, password: &str, confirmation: &str) -> Result<()> {
        let form = if link.contains("://") || link.contains("token=") {
            ResetPasswordForm::from_link(link)
        } else {
            ResetPasswordForm::with_token(link)
        };
        if let Some(err) = form.link_error() {
            bail!(err);
        }
        let reply = form
            .submit(&self.session, password, confirmation)
            .await
            .map_err(failure("Failed to reset password. Please try again."))?;
        println!("{}", reply.message);
        Ok(())
    }

    async fn view_post(&self, post_id: &str) -> Result<()> {
        let api = self.session.api();
        let post = api
            .get_post(post_id)
            .await
            .map_err(failure("Failed to load post"))?;
        let comments = api
            .post_comments(post_id)
            .await
            .map_err(failure("Failed to load comments"))?;
        print!("{}", render::post_card(&post));
        println!();
        println!("Comments ({}):", post.comments_count);
        print!("{}", render::comment_thread(&comments));
        Ok(())
    }

    async fn new_post(&self, kind: &str, title: &str, content: &str, args: &Args<'_>) -> Result<()> {
        let kind = match kind.parse::<PostType>()? {
            PostType::Notes => {
                let document = match args.option("document") {
                    Some(path) => Some(
                        Upload::from_path(path)
                            .await
                            .with_context(|| format!("failed to read {path}"))?,
                    ),
                    None => None,
                };
                PostKind::Notes { document }
            }
            PostType::Jobs => PostKind::Jobs {
                job_link: args.option("link").unwrap_or_default().to_string(),
                company: args.option("company").map(str::to_string),
                location: args.option("location").map(str::to_string),
            },
            PostType::Threads => PostKind::Threads,
        };
        let draft = PostDraft::new(title, content, kind)
            .with_tags(args.option("tags").map(parse_tags).unwrap_or_default());
        let post = forms::publish_post(&self.session, draft)
            .await
            .map_err(failure("Failed to create post"))?;
        println!("Created post {}", post.id);
        Ok(())
    }

    async fn profile(&self, username: Option<&str>) -> Result<()> {
        let user = match username {
            Some(username) => self
                .session
                .api()
                .user_profile(username)
                .await
                .map_err(failure("User not found"))?,
            None => match self.session.current_user() {
                Some(user) => (*user).clone(),
                None => {
                    println!("Not logged in. Usage: profile <username>");
                    return Ok(());
                }
            },
        };
        print!("{}", render::profile_card(&user));
        Ok(())
    }
}

/// Command arguments split into positional words and `key=value` options.
#[derive(Debug, Default, PartialEq, Eq)]
struct Args<'a> {
    positional: Vec<&'a str>,
    options: HashMap<&'a str, &'a str>,
}

/// Words every command takes before any `key=value` option. They are never
/// read as options, so quoted text such as `"name=Ada says hi"` survives.
fn leading_words(command: &str) -> usize {
    match command {
        "signup" => 4,
        "new-post" => 3,
        "user-posts" => 1,
        "feed" | "posts" | "edit-profile" => 0,
        // No options at all: free text and credentials pass through untouched.
        _ => usize::MAX,
    }
}

const OPTION_KEYS: &[&str] = &[
    "bio", "company", "document", "limit", "link", "location", "name", "search", "skip", "tags",
    "type", "username",
];

impl<'a> Args<'a> {
    fn parse(tokens: &'a [String], leading: usize) -> Self {
        let mut args = Args::default();
        let leading = leading.min(tokens.len());
        args.positional.extend(tokens[..leading].iter().map(String::as_str));
        for token in &tokens[leading..] {
            match token.split_once('=') {
                Some((key, value)) if OPTION_KEYS.contains(&key) => {
                    args.options.insert(key, value);
                }
                _ => args.positional.push(token.as_str()),
            }
        }
        args
    }

    fn option(&self, key: &str) -> Option<&'a str> {
        self.options.get(key).copied()
    }

    /// Exactly `N` positional words, or `None`.
    fn exactly<const N: usize>(&self) -> Option<[&'a str; N]> {
        <[&'a str; N]>::try_from(self.positional.as_slice()).ok()
    }

    fn pagination(&self) -> Result<Pagination> {
        let number = |key: &str| -> Result<Option<u32>> {
            self.option(key)
                .map(|raw| {
                    raw.parse::<u32>()
                        .with_context(|| format!("{key} must be a non-negative number"))
                })
                .transpose()
        };
        let limit = number("limit")?;
        if limit.is_some_and(|n| n == 0 || n > 100) {
            bail!("limit must be between 1 and 100");
        }
        Ok(Pagination {
            skip: number("skip")?,
            limit,
        })
    }
}
