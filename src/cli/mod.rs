//! CLI 모듈
//!
//! session-rag CLI 명령어 정의 및 구현

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

use crate::config::{IndexBackend, RagConfig};
use crate::embedding::has_api_key;
use crate::error::RagError;
use crate::knowledge::{SessionStore, SESSION_DIR_SUFFIX};
use crate::pipeline::RetrievalResult;
use crate::service::{DocumentChatService, IngestReport};
use crate::sweeper::prune_orphaned_storage;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "session-rag")]
#[command(version, about = "세션 격리 문서 Q&A", long_about = None)]
pub struct Cli {
    /// 네트워크 없이 실행 (해시 임베딩 + 에코 답변)
    #[arg(long, global = true)]
    pub offline: bool,

    /// 인덱스 백엔드 (memory | lance)
    #[arg(long, global = true)]
    pub backend: Option<String>,

    /// 질의당 검색할 패시지 수
    #[arg(long, global = true)]
    pub top_k: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 대화형 세션 (문서 업로드 후 질문)
    Chat {
        /// 시작할 때 업로드할 문서
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// 세션 ID (기본: 자동 생성)
        #[arg(short, long)]
        session: Option<String>,
    },

    /// 문서 하나에 대해 한 번 질문
    Ask {
        /// 문서 경로 (.pdf, .txt, .md)
        file: PathBuf,

        /// 질문
        question: String,

        /// 결과를 JSON으로 출력
        #[arg(long)]
        json: bool,
    },

    /// 디스크에 남은 오래된 세션 디렉토리 정리
    Sweep {
        /// 보존 기간과 무관하게 모두 삭제
        #[arg(long)]
        all: bool,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let config = build_config(&cli)?;

    match cli.command {
        Commands::Chat { file, session } => cmd_chat(config, cli.offline, file, session).await,
        Commands::Ask {
            file,
            question,
            json,
        } => cmd_ask(config, cli.offline, &file, &question, json).await,
        Commands::Sweep { all } => cmd_sweep(&config, all).await,
        Commands::Status => cmd_status(&config).await,
    }
}

/// 환경변수 설정 + CLI 플래그
fn build_config(cli: &Cli) -> Result<RagConfig> {
    let mut config = RagConfig::from_env().context("설정 로드 실패")?;

    if let Some(ref backend) = cli.backend {
        config.backend = IndexBackend::parse(backend)?;
    }
    if let Some(top_k) = cli.top_k {
        config.top_k = top_k;
    }

    config.validate()?;
    Ok(config)
}

fn build_service(config: RagConfig, offline: bool) -> Result<DocumentChatService> {
    if offline {
        return Ok(DocumentChatService::offline(config)?);
    }

    if !has_api_key() {
        bail!(
            "API 키가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export GEMINI_API_KEY=your-api-key\n  \
             또는\n  \
             export GOOGLE_AI_API_KEY=your-api-key\n\n\
             네트워크 없이 실행: --offline\n\
             API 키 발급: https://aistudio.google.com/app/apikey"
        );
    }

    DocumentChatService::from_env(config).context("서비스 초기화 실패")
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 대화형 명령어 (chat)
///
/// 백그라운드 스위퍼와 함께 실행되며, 입력 줄마다 명령 또는 질문을 처리합니다.
async fn cmd_chat(
    config: RagConfig,
    offline: bool,
    file: Option<PathBuf>,
    session: Option<String>,
) -> Result<()> {
    let service = build_service(config, offline)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = service.sweeper().spawn(shutdown_rx);

    let mut session_id = session.unwrap_or_else(SessionStore::generate_id);
    println!("[*] 세션: {}", session_id);
    print_chat_help();

    if let Some(ref path) = file {
        upload(&service, &session_id, path, true).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush().context("stdout flush 실패")?;

        let Some(line) = lines.next_line().await.context("입력 읽기 실패")? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (command, arg) = match line.split_once(char::is_whitespace) {
            Some((c, a)) => (c, a.trim()),
            None => (line, ""),
        };

        match command {
            "/quit" | "/exit" => break,
            "/help" => print_chat_help(),
            "/upload" | "/add" => {
                if arg.is_empty() {
                    println!("[!] 사용법: {} <파일 경로>", command);
                    continue;
                }
                upload(&service, &session_id, Path::new(arg), command == "/upload").await;
            }
            "/docs" => match service.list_documents(&session_id).await {
                Ok(docs) if docs.is_empty() => println!("[!] 업로드된 문서가 없습니다."),
                Ok(docs) => {
                    for (i, doc) in docs.iter().enumerate() {
                        println!("  {}. {}", i + 1, doc);
                    }
                }
                Err(e) => print_error(&e),
            },
            "/clear" => match service.clear_session(&session_id).await {
                Ok(_) => {
                    session_id = SessionStore::generate_id();
                    println!("[OK] 세션을 정리했습니다. 새 세션: {}", session_id);
                }
                Err(e) => print_error(&e),
            },
            "/session" => println!("[*] 세션: {}", session_id),
            _ if command.starts_with('/') => println!("[!] 알 수 없는 명령: {}", command),
            _ => match service.query(&session_id, line).await {
                Ok(result) => print_result(&result),
                Err(e) => print_error(&e),
            },
        }
    }

    // 진행 중인 스윕은 끝내고 종료
    shutdown_tx.send(true).ok();
    sweeper.await.context("스위퍼 종료 실패")?;

    Ok(())
}

fn print_chat_help() {
    println!("    /upload <path>  새 문서로 세션 시작 (기존 문서 대체)");
    println!("    /add <path>     현재 세션에 문서 추가");
    println!("    /docs           문서 목록");
    println!("    /clear          세션 정리");
    println!("    /quit           종료");
    println!();
}

/// 파일 업로드 (실패는 출력만 하고 계속)
async fn upload(service: &DocumentChatService, session_id: &str, path: &Path, replace: bool) {
    match ingest_file(service, session_id, path, replace).await {
        Ok(report) => {
            println!(
                "[OK] {} 업로드 완료 ({} 페이지, {} 패시지)",
                report.document, report.pages, report.passages
            );
            println!("     문서: {}", report.documents.join(", "));
        }
        Err(e) => match e.downcast_ref::<RagError>() {
            Some(rag) => print_error(rag),
            None => println!("[!] {:#}", e),
        },
    }
}

async fn ingest_file(
    service: &DocumentChatService,
    session_id: &str,
    path: &Path,
    replace: bool,
) -> Result<IngestReport> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("파일 읽기 실패: {:?}", path))?;

    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("파일 이름이 없습니다: {:?}", path))?;

    println!("[*] {} 처리 중... ({})", name, format_bytes(bytes.len()));

    Ok(service.ingest(session_id, name, &bytes, replace).await?)
}

/// 한 번 질문 명령어 (ask)
async fn cmd_ask(
    config: RagConfig,
    offline: bool,
    file: &Path,
    question: &str,
    json: bool,
) -> Result<()> {
    let service = build_service(config, offline)?;
    let session_id = SessionStore::generate_id();

    ingest_file(&service, &session_id, file, true)
        .await
        .context("문서 업로드 실패")?;

    let answer = service.query(&session_id, question).await;

    // 성공/실패와 무관하게 세션 저장 공간 정리
    if let Err(e) = service.clear_session(&session_id).await {
        tracing::warn!("Failed to clear session {}: {}", session_id, e);
    }

    let result = answer.context("질의 실패")?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("JSON 변환 실패")?
        );
    } else {
        print_result(&result);
    }

    Ok(())
}

/// 정리 명령어 (sweep)
///
/// 이전 실행이 남긴 Lance 세션 디렉토리를 삭제합니다.
async fn cmd_sweep(config: &RagConfig, all: bool) -> Result<()> {
    let root = config.sessions_dir();
    let retention = if all {
        std::time::Duration::ZERO
    } else {
        config.retention
    };

    let removed = prune_orphaned_storage(&root, retention, &Default::default())
        .await
        .context("세션 디렉토리 정리 실패")?;

    println!("[OK] {} 개의 세션 디렉토리를 삭제했습니다 ({})", removed, root.display());
    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(config: &RagConfig) -> Result<()> {
    println!("session-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 데이터 디렉토리: {}", config.data_dir.display());
    println!("[*] 백엔드: {:?}", config.backend);
    println!(
        "[*] 청킹: {} 문자 / 오버랩 {}",
        config.chunk.chunk_size, config.chunk.chunk_overlap
    );
    println!("[*] top-k: {}", config.top_k);
    println!(
        "[*] 보존 기간: {}s, 스윕 주기: {}s",
        config.retention.as_secs(),
        config.sweep_interval.as_secs()
    );

    if has_api_key() {
        println!("[OK] API 키: 설정됨");
    } else {
        println!("[!] API 키: 미설정 (--offline 으로 실행 가능)");
        println!("    설정: export GEMINI_API_KEY=your-key");
    }

    match disk_usage(&config.sessions_dir()).await {
        Ok((0, _)) => println!("[OK] 디스크 세션: 없음"),
        Ok((count, bytes)) => println!(
            "[OK] 디스크 세션: {} 개 ({})",
            count,
            format_bytes(bytes as usize)
        ),
        Err(e) => println!("[!] 세션 디렉토리 조회 실패: {}", e),
    }

    Ok(())
}

/// 세션 디렉토리 수와 총 크기
async fn disk_usage(root: &Path) -> std::io::Result<(usize, u64)> {
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((0, 0)),
        Err(e) => return Err(e),
    };

    let mut count = 0;
    let mut total = 0;

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_name().to_string_lossy().ends_with(SESSION_DIR_SUFFIX) {
            continue;
        }
        count += 1;
        total += dir_size(&entry.path()).await;
    }

    Ok((count, total))
}

async fn dir_size(path: &Path) -> u64 {
    let mut total = 0;
    let mut stack = vec![path.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
            continue;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            match entry.metadata().await {
                Ok(meta) if meta.is_dir() => stack.push(entry.path()),
                Ok(meta) => total += meta.len(),
                Err(_) => {}
            }
        }
    }

    total
}

// ============================================================================
// Helper Functions
// ============================================================================

fn print_result(result: &RetrievalResult) {
    println!();
    println!("{}", result.answer);
    println!();

    match result.page_number {
        Some(page) => println!(
            "[출처] {} p.{} (인용 페이지 {}개, 신뢰도 {:.0}%)",
            result.filename,
            page,
            result.total_pages,
            result.confidence * 100.0
        ),
        None => println!("[출처] {} (인용 없음)", result.filename),
    }

    for source in &result.sources {
        println!("   p.{}: {}", source.page, truncate_text(&source.snippet, 120));
    }
    println!();
}

fn print_error(e: &RagError) {
    if e.is_retryable() {
        println!("[!] {} (잠시 후 다시 시도하세요)", e.user_message());
    } else {
        println!("[!] {}", e.user_message());
    }
    tracing::debug!("{} ({})", e, e.code());
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("안녕하세요 세계", 5), "안녕하세요...");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }

    #[test]
    fn test_cli_parses_global_flags() {
        let cli = Cli::try_parse_from([
            "session-rag",
            "ask",
            "report.pdf",
            "What was the revenue?",
            "--offline",
            "--top-k",
            "3",
        ])
        .unwrap();

        assert!(cli.offline);
        assert_eq!(cli.top_k, Some(3));
        match cli.command {
            Commands::Ask { file, question, json } => {
                assert_eq!(file, PathBuf::from("report.pdf"));
                assert_eq!(question, "What was the revenue?");
                assert!(!json);
            }
            _ => panic!("expected ask"),
        }
    }

    #[tokio::test]
    async fn test_ingest_file_uses_file_name() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("notes.txt");
        std::fs::write(&path, "Q1 2024 revenue was $5M.").unwrap();

        let service = DocumentChatService::offline(RagConfig {
            embedding_dimension: 64,
            ..RagConfig::default()
        })
        .unwrap();

        let report = ingest_file(&service, "s1", &path, true).await.unwrap();
        assert_eq!(report.document, "notes.txt");
        assert_eq!(report.documents, vec!["notes.txt"]);
    }

    #[tokio::test]
    async fn test_disk_usage_counts_session_dirs() {
        let temp = TempDir::new().unwrap();
        let session = temp.path().join(format!("abc{}", SESSION_DIR_SUFFIX));
        std::fs::create_dir_all(session.join("data")).unwrap();
        std::fs::write(session.join("data").join("part"), vec![0u8; 10]).unwrap();
        std::fs::create_dir_all(temp.path().join("other")).unwrap();

        let (count, bytes) = disk_usage(temp.path()).await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(bytes, 10);

        assert_eq!(disk_usage(&temp.path().join("missing")).await.unwrap(), (0, 0));
    }
}
